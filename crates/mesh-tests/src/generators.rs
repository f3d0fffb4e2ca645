//! Builders for blocks, payloads and private data used across tests.

use mesh_proto::{
    Block, BlockHeader, CollectionPvtWrites, NamespacePvtWrites, Payload, PvtData,
    PvtDataCollections,
};

/// A minimal block with the given sequence number.
pub fn raw_block(seq_num: u64) -> Block {
    Block::new(seq_num, Vec::new())
}

/// A payload carrying the encoded minimal block.
pub fn block_payload(seq_num: u64) -> Payload {
    Payload::new(seq_num, raw_block(seq_num).encode())
}

/// A block with explicit hashes and transaction envelopes.
pub fn linked_block(
    seq_num: u64,
    previous_hash: Vec<u8>,
    data_hash: Vec<u8>,
    data: Vec<Vec<u8>>,
) -> Block {
    Block {
        header: BlockHeader {
            number: seq_num,
            previous_hash,
            data_hash,
        },
        data,
    }
}

/// Private data of one transaction writing a single collection.
pub fn single_collection_pvt_data(
    seq_in_block: u64,
    namespace: &str,
    collection: &str,
    rwset: Vec<u8>,
) -> PvtDataCollections {
    PvtDataCollections(vec![PvtData {
        seq_in_block,
        write_set: vec![NamespacePvtWrites {
            namespace: namespace.to_string(),
            collections: vec![CollectionPvtWrites {
                collection_name: collection.to_string(),
                rwset,
            }],
        }],
    }])
}
