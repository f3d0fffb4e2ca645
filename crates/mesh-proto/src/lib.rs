//! # mesh-proto
//!
//! Wire types for meshledger state replication.
//!
//! This crate provides:
//! - Block and block header structures with their binary encoding
//! - Gossip message envelope (block broadcast, state request/response)
//! - Private-data collections and their per-transaction marshalling
//! - Channel identifiers

mod block;
mod codec;
mod error;
mod message;
mod pvtdata;

pub use block::{Block, BlockHeader};
pub use error::{ProtoError, ProtoResult};
pub use message::{
    ChannelId, DataMessage, GossipContent, GossipMessage, Payload, RemoteStateRequest,
    RemoteStateResponse,
};
pub use pvtdata::{CollectionPvtWrites, NamespacePvtWrites, PvtData, PvtDataCollections};

/// Maximum size of a single encoded block or private-data blob.
pub const MAX_ENCODED_SIZE: usize = 8 * 1024 * 1024; // 8 MB
