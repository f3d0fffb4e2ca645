//! Channel-scoped authorization.

use crate::{GossipResult, PeerIdentity};
use mesh_proto::ChannelId;

/// The cryptographic message service consumed by the request server.
///
/// Implementations decide whether `identity` may act on `channel`; this crate
/// never inspects certificates itself.
pub trait MessageCryptoService: Send + Sync {
    /// Verify that `identity` signed `message` with `signature` and is
    /// authorized on `channel`. An `Err` denies the operation.
    fn verify_by_channel(
        &self,
        channel: &ChannelId,
        identity: &PeerIdentity,
        signature: &[u8],
        message: &[u8],
    ) -> GossipResult<()>;
}
