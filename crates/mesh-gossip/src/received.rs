//! Inbound directed messages and their sender context.

use crate::{PeerIdentity, PkiId};
use mesh_proto::GossipMessage;

/// Authentication material the transport captured for an inbound message.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    /// The bytes the sender signed.
    pub signed_data: Vec<u8>,
    /// Signature over `signed_data`.
    pub signature: Vec<u8>,
}

/// Connection-level context of an inbound directed message.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Sender's peer identifier.
    pub pki_id: PkiId,
    /// Sender's serialized identity.
    pub identity: PeerIdentity,
    /// Sender's endpoint.
    pub endpoint: String,
    /// Authentication material, absent when the transport did not sign.
    pub auth: Option<AuthInfo>,
}

/// A directed message delivered by the overlay, with enough context to
/// authorize the sender and to answer over the same connection.
pub trait ReceivedMessage: Send + Sync {
    /// The received message.
    fn gossip_message(&self) -> &GossipMessage;

    /// Context about the sending peer.
    fn connection_info(&self) -> &ConnectionInfo;

    /// Send a reply directly back to the sender.
    fn respond(&self, msg: GossipMessage);
}
