//! # mesh-gossip
//!
//! Capability traits through which the state replication core consumes its
//! external collaborators:
//! - The gossip overlay (membership, broadcast, directed sends, metadata)
//! - The message crypto service (channel-scoped authorization)
//!
//! The core never sees a concrete overlay or crypto type; everything is a
//! trait object so deployments and tests wire in their own implementations.

mod adapter;
mod crypto;
mod error;
mod member;
mod received;

pub use adapter::{GossipAdapter, JoinChannelMessage, MessagePredicate};
pub use crypto::MessageCryptoService;
pub use error::{GossipError, GossipResult};
pub use member::{AnchorPeer, NetworkMember, PeerIdentity, PkiId, RemotePeer};
pub use received::{AuthInfo, ConnectionInfo, ReceivedMessage};
