//! Wire format error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire payloads.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// Payload cannot be decoded.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Payload exceeds the allowed size.
    #[error("Payload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// A private-data entry is empty or ill-formed.
    #[error("Malformed private data payload, rwset index {index}: {reason}")]
    MalformedPvtData { index: usize, reason: String },
}

/// Result type for wire operations.
pub type ProtoResult<T> = Result<T, ProtoError>;
