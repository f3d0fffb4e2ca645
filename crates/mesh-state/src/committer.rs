//! The local ledger committer, referenced only by interface.

use mesh_proto::Block;
use thiserror::Error;

/// Error reported by the backing ledger.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct LedgerError(pub String);

impl LedgerError {
    /// Create from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Appends blocks to and queries the local ledger.
///
/// The core treats the committer as single-writer: only the deliver loop
/// commits, while the request server may read concurrently.
pub trait Committer: Send + Sync {
    /// Append a block to the ledger.
    fn commit(&self, block: &Block) -> Result<(), LedgerError>;

    /// One past the highest committed block sequence.
    fn ledger_height(&self) -> Result<u64, LedgerError>;

    /// Fetch blocks by sequence number; sequences the ledger does not hold
    /// are omitted from the result.
    fn get_blocks(&self, seq_nums: &[u64]) -> Vec<Block>;

    /// Release ledger resources.
    fn close(&self);
}
