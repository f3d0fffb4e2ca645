//! The gossip overlay as seen by the state replication core.

use crate::{AnchorPeer, NetworkMember, ReceivedMessage, RemotePeer};
use mesh_proto::{ChannelId, GossipMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Predicate selecting which inbound messages a subscription receives.
pub type MessagePredicate = Arc<dyn Fn(&GossipMessage) -> bool + Send + Sync>;

/// Channel membership announcement derived from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinChannelMessage {
    /// Configuration sequence number the membership was taken from.
    pub sequence_number: u64,
    /// Anchor peers of the channel.
    pub anchor_peers: Vec<AnchorPeer>,
}

/// One-way interface onto the gossip overlay.
///
/// The overlay owns membership, transport and message signing; the core only
/// subscribes, sends and reads discovery data. Implementations must be
/// thread-safe: every method may be called from any of the core's tasks.
pub trait GossipAdapter: Send + Sync {
    /// Subscribe to broadcast messages matching `predicate`.
    ///
    /// The returned receiver is the single consumer of the subscription.
    fn accept_broadcast(&self, predicate: MessagePredicate) -> mpsc::Receiver<GossipMessage>;

    /// Subscribe to directed messages matching `predicate`.
    fn accept_direct(
        &self,
        predicate: MessagePredicate,
    ) -> mpsc::Receiver<Box<dyn ReceivedMessage>>;

    /// Disseminate a message over the overlay.
    fn gossip(&self, msg: GossipMessage);

    /// Send a message directly to one peer.
    fn send(&self, msg: GossipMessage, peer: &RemotePeer);

    /// Current members of the channel, with their advertised metadata.
    fn peers_of_channel(&self, channel: &ChannelId) -> Vec<NetworkMember>;

    /// Publish this peer's channel metadata.
    fn update_channel_metadata(&self, metadata: Vec<u8>, channel: &ChannelId);

    /// Join a channel with the given membership announcement.
    fn join_channel(&self, join_msg: &JoinChannelMessage, channel: &ChannelId);

    /// Release overlay resources.
    fn close(&self);
}
