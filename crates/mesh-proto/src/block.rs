//! Block and block header wire types.

use crate::codec::{get_bytes, get_count, get_u64, put_bytes};
use crate::{ProtoError, ProtoResult};
use bytes::BufMut;

/// Maximum number of transaction envelopes in a single block.
const MAX_BLOCK_ENTRIES: usize = 10_000;

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block sequence number.
    pub number: u64,
    /// Hash of the previous block header.
    pub previous_hash: Vec<u8>,
    /// Hash of the block data.
    pub data_hash: Vec<u8>,
}

/// A numbered unit of the ledger, produced upstream by ordering.
///
/// The subsystem treats block contents as opaque; only the header number
/// participates in replication decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,
    /// Transaction envelopes, opaque to this subsystem.
    pub data: Vec<Vec<u8>>,
}

impl Block {
    /// Create a block with the given sequence number and previous hash.
    pub fn new(number: u64, previous_hash: Vec<u8>) -> Self {
        Self {
            header: BlockHeader {
                number,
                previous_hash,
                data_hash: Vec::new(),
            },
            data: Vec::new(),
        }
    }

    /// Block sequence number.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Serialize the block to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u64(self.header.number);
        put_bytes(&mut buf, &self.header.previous_hash);
        put_bytes(&mut buf, &self.header.data_hash);
        buf.put_u32(self.data.len() as u32);
        for entry in &self.data {
            put_bytes(&mut buf, entry);
        }
        buf
    }

    /// Parse a block from bytes.
    pub fn decode(data: &[u8]) -> ProtoResult<Self> {
        let mut buf = data;
        let number = get_u64(&mut buf)?;
        let previous_hash = get_bytes(&mut buf)?;
        let data_hash = get_bytes(&mut buf)?;
        let count = get_count(&mut buf, MAX_BLOCK_ENTRIES)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(get_bytes(&mut buf)?);
        }
        if !buf.is_empty() {
            return Err(ProtoError::Malformed(format!(
                "{} trailing bytes after block",
                buf.len()
            )));
        }
        Ok(Self {
            header: BlockHeader {
                number,
                previous_hash,
                data_hash,
            },
            data: entries,
        })
    }
}
