//! State replication error types.

use mesh_proto::ProtoError;
use thiserror::Error;

/// State replication errors.
#[derive(Error, Debug)]
pub enum StateError {
    /// Push rejected by the payload buffer (stale or too far ahead).
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Operation attempted after `stop`.
    #[error("State provider is stopped")]
    Stopped,

    /// Requester failed channel-scoped authorization.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The committer cannot report the ledger height.
    #[error("Failed obtaining ledger height: {0}")]
    LedgerUnavailable(String),

    /// The committer rejected a block.
    #[error("Failed committing block {seq_num}: {reason}")]
    CommitFailed { seq_num: u64, reason: String },

    /// Wire payload cannot be decoded.
    #[error("Malformed message: {0}")]
    Malformed(#[from] ProtoError),

    /// A payload without block bytes was handed in.
    #[error("Given payload is nil")]
    NilPayload,
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
