//! Oplog entry encoding and decoding
//!
//! ## Entry Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: size of type + payload + crc (not including length itself),
//!   little endian
//! - **type**: entry type tag (0x10 = insert, 0x11 = update)
//! - **payload**: MessagePack (`rmp-serde`) encoding of the [`OplogEntry`]
//! - **crc32**: CRC32 over \[type\]\[payload\]
//!
//! A buffer too short for the declared length is reported as
//! `Error::IncompleteEntry` (a torn tail write), not as corruption.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{Cursor, Read};

use pagoda_core::{Error, OpKind, Result};

use crate::oplog::OplogEntry;

/// Insert entry type tag
pub const TYPE_INSERT: u8 = 0x10;
/// Update entry type tag
pub const TYPE_UPDATE: u8 = 0x11;

/// Smallest valid value of the length field: type(1) + crc(4)
const MIN_ENTRY_LEN: usize = 5;

fn type_tag(op: OpKind) -> u8 {
    match op {
        OpKind::Insert => TYPE_INSERT,
        OpKind::Update => TYPE_UPDATE,
    }
}

fn checksum(tag: u8, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[tag]);
    hasher.update(payload);
    hasher.finalize()
}

/// Encode an oplog entry to bytes ready for appending
pub fn encode_entry(entry: &OplogEntry) -> Result<Vec<u8>> {
    let tag = type_tag(entry.op);
    let payload = rmp_serde::to_vec_named(entry)?;
    let total_len = 1 + payload.len() + 4;
    let len_field = u32::try_from(total_len)
        .map_err(|_| Error::SerializationError(format!("oplog entry of {} bytes", total_len)))?;

    let mut buf = Vec::with_capacity(4 + total_len);
    buf.write_u32::<LittleEndian>(len_field)?;
    buf.write_u8(tag)?;
    buf.extend_from_slice(&payload);
    buf.write_u32::<LittleEndian>(checksum(tag, &payload))?;
    Ok(buf)
}

/// Decode one entry from the front of `buf`
///
/// Returns the entry and the number of bytes consumed. `offset` is the
/// entry's position in the log, used for error messages.
///
/// # Errors
///
/// - `Error::IncompleteEntry` if `buf` ends before the entry does
/// - `Error::Corruption` on a bad length, CRC mismatch, undecodable payload,
///   or a type tag that disagrees with the payload
pub fn decode_entry(buf: &[u8], offset: u64) -> Result<(OplogEntry, usize)> {
    let mut cursor = Cursor::new(buf);

    let total_len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: 4,
        })? as usize;

    if total_len < MIN_ENTRY_LEN {
        return Err(Error::Corruption(format!(
            "offset {}: invalid entry length {}",
            offset, total_len
        )));
    }
    if buf.len() < 4 + total_len {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: 4 + total_len,
        });
    }

    let tag = cursor
        .read_u8()
        .map_err(|_| Error::Corruption(format!("offset {}: failed to read type tag", offset)))?;
    let mut payload = vec![0u8; total_len - MIN_ENTRY_LEN];
    cursor
        .read_exact(&mut payload)
        .map_err(|_| Error::Corruption(format!("offset {}: failed to read payload", offset)))?;
    let expected_crc = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::Corruption(format!("offset {}: failed to read CRC", offset)))?;

    let actual_crc = checksum(tag, &payload);
    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "offset {}: CRC mismatch: expected {:08x}, got {:08x}",
            offset, expected_crc, actual_crc
        )));
    }

    let entry: OplogEntry = rmp_serde::from_slice(&payload).map_err(|e| {
        Error::Corruption(format!("offset {}: deserialization failed: {}", offset, e))
    })?;
    if type_tag(entry.op) != tag {
        return Err(Error::Corruption(format!(
            "offset {}: type tag {:#04x} does not match a {} entry",
            offset, tag, entry.op
        )));
    }

    Ok((entry, 4 + total_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pagoda_core::Document;
    use serde_json::json;

    fn entry(op: OpKind) -> OplogEntry {
        OplogEntry {
            seq: 7,
            wall: Utc::now(),
            op,
            ns: "test.docs".to_string(),
            object: Document::try_from(json!({"$set": {"a.b": [1, 2, {"c": null}]}})).unwrap(),
            query: Some(Document::try_from(json!({"_id": -3})).unwrap()),
            from_migrate: false,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let e = entry(OpKind::Update);
        let bytes = encode_entry(&e).unwrap();
        let (decoded, consumed) = decode_entry(&bytes, 0).unwrap();
        assert_eq!(decoded, e);
        assert_eq!(consumed, bytes.len());
        assert_eq!(bytes[4], TYPE_UPDATE);
    }

    #[test]
    fn test_truncated_is_incomplete() {
        let bytes = encode_entry(&entry(OpKind::Insert)).unwrap();
        for cut in [0, 3, 4, bytes.len() - 1] {
            let result = decode_entry(&bytes[..cut], 100);
            assert!(
                matches!(result, Err(Error::IncompleteEntry { offset: 100, .. })),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_flipped_bit_is_corruption() {
        let mut bytes = encode_entry(&entry(OpKind::Insert)).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(matches!(
            decode_entry(&bytes, 0),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_wrong_tag_is_corruption() {
        let e = entry(OpKind::Insert);
        let payload = rmp_serde::to_vec_named(&e).unwrap();
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>((payload.len() + 5) as u32).unwrap();
        bytes.write_u8(TYPE_UPDATE).unwrap();
        bytes.extend_from_slice(&payload);
        bytes
            .write_u32::<LittleEndian>(checksum(TYPE_UPDATE, &payload))
            .unwrap();
        assert!(matches!(
            decode_entry(&bytes, 0),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_short_length_field_is_corruption() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(2).unwrap();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            decode_entry(&bytes, 0),
            Err(Error::Corruption(_))
        ));
    }
}
