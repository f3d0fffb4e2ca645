//! Membership and identity types.

use serde::{Deserialize, Serialize};

/// Unique peer identifier derived from the peer's certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PkiId(pub Vec<u8>);

impl PkiId {
    /// Create from bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

impl std::fmt::Display for PkiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Serialized peer identity presented for authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity(pub Vec<u8>);

impl PeerIdentity {
    /// Create from bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A member of a channel as reported by the overlay's discovery layer.
#[derive(Debug, Clone)]
pub struct NetworkMember {
    /// Peer identifier.
    pub pki_id: PkiId,
    /// Reachable endpoint.
    pub endpoint: String,
    /// Opaque channel metadata the member advertises (its metastate bytes).
    pub metadata: Vec<u8>,
}

/// Addressing handle for a directed send.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    /// Peer identifier.
    pub pki_id: PkiId,
    /// Reachable endpoint.
    pub endpoint: String,
}

impl From<&NetworkMember> for RemotePeer {
    fn from(member: &NetworkMember) -> Self {
        Self {
            pki_id: member.pki_id.clone(),
            endpoint: member.endpoint.clone(),
        }
    }
}

/// An anchor peer named by channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPeer {
    /// Host name.
    pub host: String,
    /// Port.
    pub port: u16,
}
