//! Overlay-facing error types.

use thiserror::Error;

/// Errors surfaced by overlay collaborators.
#[derive(Error, Debug)]
pub enum GossipError {
    /// Channel-scoped authorization failed.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Message failed signature verification.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// Result type for overlay operations.
pub type GossipResult<T> = Result<T, GossipError>;
