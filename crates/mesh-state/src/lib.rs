//! # mesh-state
//!
//! Peer-to-peer ledger state replication for meshledger.
//!
//! This crate provides:
//! - A gap-tolerant payload buffer feeding an in-order commit loop
//! - The gossip state provider and its background tasks
//! - The anti-entropy engine pulling missing block ranges from peers
//! - The state request server answering authorized peers
//! - The coordinator façade joining public blocks with private data
//! - Channel metadata advertising and configuration event processing

mod advertiser;
mod antientropy;
mod committer;
mod config;
mod coordinator;
mod error;
mod eventer;
mod metastate;
mod payload_buffer;
mod provider;
mod server;

pub use antientropy::{AntiEntropySnapshot, AntiEntropyStats};
pub use committer::{Committer, LedgerError};
pub use config::{
    StateConfig, DEF_ANTI_ENTROPY_BATCH_SIZE, DEF_ANTI_ENTROPY_INTERVAL,
    DEF_ANTI_ENTROPY_MAX_RETRIES, DEF_ANTI_ENTROPY_RESPONSE_TIMEOUT, DEF_CHANNEL_BUFFER_SIZE,
    DEF_MAX_BLOCK_DISTANCE, DEF_PUBLISH_STATE_INFO_INTERVAL,
};
pub use coordinator::{
    allow_all_filter, Coordinator, CoordinatorError, LedgerCoordinator, PvtDataFilter,
};
pub use error::{StateError, StateResult};
pub use eventer::{ChannelConfiguration, ConfigEventer, ConfigReceiver, JoinChannelReceiver};
pub use metastate::NodeMetastate;
pub use payload_buffer::PayloadBuffer;
pub use provider::{CommitFailureHook, GossipStateProvider, ServicesMediator};
