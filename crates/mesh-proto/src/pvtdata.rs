//! Private-data write sets distributed apart from the public block body.

use crate::codec::{get_bytes, get_count, get_str, get_u64, put_bytes, put_str};
use crate::{ProtoError, ProtoResult};
use bytes::BufMut;

/// Maximum namespaces or collections per write set.
const MAX_WRITE_SET_ENTRIES: usize = 1_000;

/// Write set of a single private collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPvtWrites {
    /// Collection name.
    pub collection_name: String,
    /// Opaque read-write set bytes.
    pub rwset: Vec<u8>,
}

/// Per-namespace private write sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePvtWrites {
    /// Namespace (chaincode) the writes belong to.
    pub namespace: String,
    /// Collections written within the namespace.
    pub collections: Vec<CollectionPvtWrites>,
}

/// Private data of one transaction within a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvtData {
    /// Index of the transaction inside its block.
    pub seq_in_block: u64,
    /// The transaction's private write sets, partitioned by namespace.
    pub write_set: Vec<NamespacePvtWrites>,
}

impl PvtData {
    /// Serialize to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u64(self.seq_in_block);
        buf.put_u32(self.write_set.len() as u32);
        for ns in &self.write_set {
            put_str(&mut buf, &ns.namespace);
            buf.put_u32(ns.collections.len() as u32);
            for col in &ns.collections {
                put_str(&mut buf, &col.collection_name);
                put_bytes(&mut buf, &col.rwset);
            }
        }
        buf
    }

    /// Parse from bytes.
    pub fn decode(data: &[u8]) -> ProtoResult<Self> {
        let mut buf = data;
        let seq_in_block = get_u64(&mut buf)?;
        let ns_count = get_count(&mut buf, MAX_WRITE_SET_ENTRIES)?;
        let mut write_set = Vec::with_capacity(ns_count);
        for _ in 0..ns_count {
            let namespace = get_str(&mut buf)?;
            let col_count = get_count(&mut buf, MAX_WRITE_SET_ENTRIES)?;
            let mut collections = Vec::with_capacity(col_count);
            for _ in 0..col_count {
                collections.push(CollectionPvtWrites {
                    collection_name: get_str(&mut buf)?,
                    rwset: get_bytes(&mut buf)?,
                });
            }
            write_set.push(NamespacePvtWrites {
                namespace,
                collections,
            });
        }
        Ok(Self {
            seq_in_block,
            write_set,
        })
    }
}

/// Private data of all transactions of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PvtDataCollections(pub Vec<PvtData>);

impl PvtDataCollections {
    /// Create an empty collection set.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Number of transactions carrying private data.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no transaction carries private data.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Marshal into one byte blob per transaction, the form carried inside a
    /// [`Payload`](crate::Payload).
    pub fn marshal(&self) -> ProtoResult<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(self.0.len());
        for (index, pvt) in self.0.iter().enumerate() {
            if pvt.write_set.is_empty() {
                return Err(ProtoError::MalformedPvtData {
                    index,
                    reason: "write set is empty".into(),
                });
            }
            out.push(pvt.encode());
        }
        Ok(out)
    }

    /// Reassemble from per-transaction blobs.
    pub fn unmarshal(blobs: &[Vec<u8>]) -> ProtoResult<Self> {
        let mut out = Vec::with_capacity(blobs.len());
        for (index, blob) in blobs.iter().enumerate() {
            let pvt = PvtData::decode(blob).map_err(|e| ProtoError::MalformedPvtData {
                index,
                reason: e.to_string(),
            })?;
            out.push(pvt);
        }
        Ok(Self(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pvt(seq_in_block: u64, rwset: Vec<u8>) -> PvtData {
        PvtData {
            seq_in_block,
            write_set: vec![NamespacePvtWrites {
                namespace: "ns1".to_string(),
                collections: vec![CollectionPvtWrites {
                    collection_name: "secretCollection".to_string(),
                    rwset,
                }],
            }],
        }
    }

    #[test]
    fn test_marshal_produces_one_blob_per_tx() {
        let collections = PvtDataCollections(vec![
            sample_pvt(1, vec![1, 2, 3, 4, 5, 6, 7]),
            PvtData {
                seq_in_block: 2,
                write_set: vec![
                    NamespacePvtWrites {
                        namespace: "ns1".to_string(),
                        collections: vec![CollectionPvtWrites {
                            collection_name: "secretCollection".to_string(),
                            rwset: vec![42; 7],
                        }],
                    },
                    NamespacePvtWrites {
                        namespace: "ns2".to_string(),
                        collections: vec![CollectionPvtWrites {
                            collection_name: "otherCollection".to_string(),
                            rwset: vec![10, 9, 8, 7, 6, 5, 4, 3, 2, 1],
                        }],
                    },
                ],
            },
        ]);

        let blobs = collections.marshal().unwrap();
        assert_eq!(blobs.len(), 2);
    }

    #[test]
    fn test_marshal_fails_on_empty_write_set() {
        let collections = PvtDataCollections(vec![
            sample_pvt(1, vec![1, 2, 3]),
            PvtData {
                seq_in_block: 2,
                write_set: Vec::new(),
            },
        ]);

        let err = collections.marshal().unwrap_err();
        assert!(err.to_string().contains("rwset index 1"));
    }

    #[test]
    fn test_unmarshal_roundtrip() {
        let collections = PvtDataCollections(vec![sample_pvt(1, vec![1, 2, 3, 4, 5, 6, 7])]);

        let blobs = collections.marshal().unwrap();
        assert_eq!(blobs.len(), 1);

        let restored = PvtDataCollections::unmarshal(&blobs).unwrap();
        assert_eq!(restored, collections);
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        let err = PvtDataCollections::unmarshal(&[vec![1, 2, 3]]).unwrap_err();
        assert!(err.to_string().contains("rwset index 0"));
    }
}
