//! Length-prefixed binary primitives shared by the wire types.
//!
//! Every variable-length field is written as a big-endian `u32` length
//! followed by the raw bytes. Decoders validate lengths against both the
//! remaining input and [`MAX_ENCODED_SIZE`](crate::MAX_ENCODED_SIZE) before
//! allocating.

use crate::{ProtoError, ProtoResult, MAX_ENCODED_SIZE};
use bytes::{Buf, BufMut};

/// Append a length-prefixed byte slice.
pub(crate) fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Read a length-prefixed byte vector.
pub(crate) fn get_bytes(buf: &mut &[u8]) -> ProtoResult<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(ProtoError::Malformed("truncated length prefix".into()));
    }
    let len = buf.get_u32() as usize;
    if len > MAX_ENCODED_SIZE {
        return Err(ProtoError::TooLarge {
            size: len,
            max: MAX_ENCODED_SIZE,
        });
    }
    if buf.remaining() < len {
        return Err(ProtoError::Malformed(format!(
            "field claims {} bytes but only {} remain",
            len,
            buf.remaining()
        )));
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Append a length-prefixed UTF-8 string.
pub(crate) fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

/// Read a length-prefixed UTF-8 string.
pub(crate) fn get_str(buf: &mut &[u8]) -> ProtoResult<String> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes).map_err(|e| ProtoError::Malformed(format!("invalid UTF-8: {}", e)))
}

/// Read a `u64` field.
pub(crate) fn get_u64(buf: &mut &[u8]) -> ProtoResult<u64> {
    if buf.remaining() < 8 {
        return Err(ProtoError::Malformed("truncated u64 field".into()));
    }
    Ok(buf.get_u64())
}

/// Read a `u32` count field, bounded so a corrupt count cannot drive a huge
/// up-front allocation.
pub(crate) fn get_count(buf: &mut &[u8], max: usize) -> ProtoResult<usize> {
    if buf.remaining() < 4 {
        return Err(ProtoError::Malformed("truncated count field".into()));
    }
    let count = buf.get_u32() as usize;
    if count > max {
        return Err(ProtoError::Malformed(format!(
            "count {} exceeds limit {}",
            count, max
        )));
    }
    Ok(count)
}
