//! Coordinator façade joining public blocks with private data.

use crate::committer::{Committer, LedgerError};
use mesh_proto::{Block, NamespacePvtWrites, PvtData, PvtDataCollections};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Coordinator errors.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// The backing ledger failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The requested block is not in the ledger.
    #[error("cannot retrieve block {0} from the ledger")]
    BlockNotFound(u64),
}

/// Restricts which `{namespace, collection}` write sets a read returns.
pub type PvtDataFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// A filter admitting every collection.
pub fn allow_all_filter() -> PvtDataFilter {
    Arc::new(|_, _| true)
}

/// Synchronous façade over the committer, augmented to marry public blocks
/// with their private read-write sets.
///
/// The coordinator does not buffer, does not reorder and performs no network
/// I/O.
pub trait Coordinator: Send + Sync {
    /// Commit a block together with its private data. Returns the ids of
    /// transactions whose private content the local peer is entitled to but
    /// does not yet hold, so the caller can schedule reconciliation.
    fn store_block(
        &self,
        block: Block,
        pvt_data: PvtDataCollections,
    ) -> Result<Vec<String>, CoordinatorError>;

    /// Read a block with the private collections admitted by `filter`.
    fn get_pvt_data_and_block_by_num(
        &self,
        seq_num: u64,
        filter: &PvtDataFilter,
    ) -> Result<(Block, PvtDataCollections), CoordinatorError>;

    /// Read a block without private data.
    fn get_block_by_num(&self, seq_num: u64) -> Result<Block, CoordinatorError>;

    /// One past the highest committed block sequence.
    fn ledger_height(&self) -> Result<u64, CoordinatorError>;

    /// Release underlying resources.
    fn close(&self);
}

/// Coordinator backed by a [`Committer`] for public blocks, with a private
/// write-set store of its own keyed by block sequence.
///
/// The committer interface carries only the public block, so the collections
/// handed to [`store_block`](Coordinator::store_block) are kept here and
/// re-joined with the block on reads, restricted by the caller's filter. The
/// store carries no entitlement information, so nothing is ever reported as
/// missing; a deployment with a collection policy wraps the coordinator to
/// schedule reconciliation.
pub struct LedgerCoordinator {
    committer: Arc<dyn Committer>,
    pvt_data: Mutex<BTreeMap<u64, PvtDataCollections>>,
}

impl LedgerCoordinator {
    /// Create a coordinator over the given committer.
    pub fn new(committer: Arc<dyn Committer>) -> Self {
        Self {
            committer,
            pvt_data: Mutex::new(BTreeMap::new()),
        }
    }
}

/// Keep only the write sets admitted by `filter`, dropping namespaces and
/// transactions left with nothing.
fn filter_collections(pvt_data: &PvtDataCollections, filter: &PvtDataFilter) -> PvtDataCollections {
    let mut admitted = Vec::new();
    for pvt in &pvt_data.0 {
        let write_set: Vec<NamespacePvtWrites> = pvt
            .write_set
            .iter()
            .filter_map(|ns| {
                let collections: Vec<_> = ns
                    .collections
                    .iter()
                    .filter(|col| filter(&ns.namespace, &col.collection_name))
                    .cloned()
                    .collect();
                (!collections.is_empty()).then(|| NamespacePvtWrites {
                    namespace: ns.namespace.clone(),
                    collections,
                })
            })
            .collect();
        if !write_set.is_empty() {
            admitted.push(PvtData {
                seq_in_block: pvt.seq_in_block,
                write_set,
            });
        }
    }
    PvtDataCollections(admitted)
}

impl Coordinator for LedgerCoordinator {
    fn store_block(
        &self,
        block: Block,
        pvt_data: PvtDataCollections,
    ) -> Result<Vec<String>, CoordinatorError> {
        let seq_num = block.number();
        self.committer.commit(&block)?;
        if !pvt_data.is_empty() {
            debug!(
                seq_num,
                transactions = pvt_data.len(),
                "Stored private data alongside block"
            );
            self.pvt_data.lock().insert(seq_num, pvt_data);
        }
        Ok(Vec::new())
    }

    fn get_pvt_data_and_block_by_num(
        &self,
        seq_num: u64,
        filter: &PvtDataFilter,
    ) -> Result<(Block, PvtDataCollections), CoordinatorError> {
        let block = self.get_block_by_num(seq_num)?;
        let pvt_data = match self.pvt_data.lock().get(&seq_num) {
            Some(stored) => filter_collections(stored, filter),
            None => PvtDataCollections::empty(),
        };
        Ok((block, pvt_data))
    }

    fn get_block_by_num(&self, seq_num: u64) -> Result<Block, CoordinatorError> {
        self.committer
            .get_blocks(&[seq_num])
            .into_iter()
            .next()
            .ok_or(CoordinatorError::BlockNotFound(seq_num))
    }

    fn ledger_height(&self) -> Result<u64, CoordinatorError> {
        Ok(self.committer.ledger_height()?)
    }

    fn close(&self) {
        self.committer.close();
    }
}
