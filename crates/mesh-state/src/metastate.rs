//! Node metastate advertised in channel metadata.

use crate::{StateError, StateResult};
use bytes::{Buf, BufMut};
use mesh_proto::ProtoError;

/// Size of the encoded metastate record.
const METASTATE_SIZE: usize = 8;

/// The small record each peer advertises over the overlay.
///
/// Other peers index this to select anti-entropy targets; it is a hint only
/// and never trusted beyond that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMetastate {
    /// One past the highest committed block sequence.
    pub ledger_height: u64,
}

impl NodeMetastate {
    /// Create a metastate at the given height.
    pub fn new(ledger_height: u64) -> Self {
        Self { ledger_height }
    }

    /// Serialize to the compact byte blob carried in channel metadata.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(METASTATE_SIZE);
        buf.put_u64(self.ledger_height);
        buf
    }

    /// Parse from channel metadata bytes.
    pub fn from_bytes(mut data: &[u8]) -> StateResult<Self> {
        if data.len() != METASTATE_SIZE {
            return Err(StateError::Malformed(ProtoError::Malformed(format!(
                "metastate must be {} bytes, got {}",
                METASTATE_SIZE,
                data.len()
            ))));
        }
        Ok(Self {
            ledger_height: data.get_u64(),
        })
    }
}
