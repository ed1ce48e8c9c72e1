//! Entry Wire Codec
//!
//! This module implements the on-disk byte layout of an entry. The format
//! is self-delimiting at both ends so a byte range can be decoded from the
//! front (`unmarshal`) or from the back (`unmarshal_last`) without scanning.
//!
//! ## Entry Layout
//!
//! All integers are big-endian:
//!
//! ```text
//! ┌────────────┬──────┬─────────┬────────────┬────────────┐
//! │ length     │ type │ seq     │ timestamp  │ attr_count │
//! │ (4 bytes)  │ (1)  │ (8)     │ (8)        │ (2)        │
//! └────────────┴──────┴─────────┴────────────┴────────────┘
//! per attribute:
//! ┌─────────┬───────────┬───────────┬──────────────────────┐
//! │ key_len │ key       │ value_len │ value (1 tag byte +  │
//! │ (2)     │ (N bytes) │ (4)       │ scalar body)         │
//! └─────────┴───────────┴───────────┴──────────────────────┘
//! ┌─────────────┬───────────┬────────────┐
//! │ payload_len │ payload   │ length     │
//! │ (4)         │ (M bytes) │ (4, again) │
//! └─────────────┴───────────┴────────────┘
//! ```
//!
//! The `length` fields count the whole record including themselves; the
//! trailing copy is what makes `unmarshal_last` O(1).
//!
//! ## Attribute values
//!
//! A value is one tag byte followed by the scalar body: `0` string (UTF-8),
//! `1` integer (8 bytes), `2` bool (1 byte), `3` raw bytes. `value_len`
//! covers the tag byte.

use crate::entry::{AttrValue, Entry, EntryType};
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes};
use std::collections::BTreeMap;

const LEN_SIZE: usize = 4;

/// Smallest possible encoded entry: both lengths, type, seq, timestamp,
/// empty attribute set, empty payload.
pub const MIN_ENTRY_SIZE: usize = LEN_SIZE + 1 + 8 + 8 + 2 + 4 + LEN_SIZE;

const ATTR_TAG_STR: u8 = 0;
const ATTR_TAG_INT: u8 = 1;
const ATTR_TAG_BOOL: u8 = 2;
const ATTR_TAG_BYTES: u8 = 3;

/// Number of bytes `marshal_to` will write for this entry.
pub fn encoded_size(entry: &Entry) -> usize {
    LEN_SIZE + 1 + 8 + 8 + attributes_encoded_size(&entry.attributes) + 4 + entry.payload.len()
        + LEN_SIZE
}

/// Encode `entry` into the front of `dst`. Returns the number of bytes
/// written, which always equals [`encoded_size`].
pub fn marshal_to(entry: &Entry, dst: &mut [u8]) -> Result<usize> {
    let size = encoded_size(entry);
    if dst.len() < size {
        return Err(Error::BufferTooSmall {
            need: size,
            have: dst.len(),
        });
    }

    let mut buf = &mut dst[..size];
    buf.put_u32(size as u32);
    buf.put_u8(entry.entry_type as u8);
    buf.put_i64(entry.seq);
    buf.put_i64(entry.timestamp);
    put_attributes(&mut buf, &entry.attributes);
    buf.put_u32(entry.payload.len() as u32);
    buf.put_slice(&entry.payload);
    buf.put_u32(size as u32);

    Ok(size)
}

/// Decode the entry starting at byte 0 of `data`. Returns the number of
/// bytes consumed and the entry.
pub fn unmarshal(data: &[u8]) -> Result<(usize, Entry)> {
    if data.len() < LEN_SIZE {
        return Err(Error::Corrupted(
            "buffer too short for length prefix".to_string(),
        ));
    }
    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if size < MIN_ENTRY_SIZE || size > data.len() {
        return Err(Error::Corrupted(format!(
            "entry length {} out of range (buffer is {})",
            size,
            data.len()
        )));
    }

    let trailer = u32::from_be_bytes([
        data[size - 4],
        data[size - 3],
        data[size - 2],
        data[size - 1],
    ]) as usize;
    if trailer != size {
        return Err(Error::Corrupted(format!(
            "trailing length {} does not match leading length {}",
            trailer, size
        )));
    }

    // Body between the two length fields.
    let mut buf = &data[LEN_SIZE..size - LEN_SIZE];
    let entry_type = EntryType::try_from(take_u8(&mut buf)?)?;
    let seq = take_i64(&mut buf)?;
    let timestamp = take_i64(&mut buf)?;
    let attributes = take_attributes(&mut buf)?;
    let payload_len = take_u32(&mut buf)? as usize;
    if buf.len() != payload_len {
        return Err(Error::Corrupted(format!(
            "payload length {} does not match remaining {} bytes",
            payload_len,
            buf.len()
        )));
    }
    let payload = Bytes::copy_from_slice(buf);

    Ok((
        size,
        Entry {
            seq,
            entry_type,
            timestamp,
            attributes,
            payload,
        },
    ))
}

/// Decode the last entry in `data` using the trailing length field.
/// Returns the encoded size of that entry and the entry itself.
pub fn unmarshal_last(data: &[u8]) -> Result<(usize, Entry)> {
    if data.len() < LEN_SIZE {
        return Err(Error::Corrupted(
            "buffer too short for trailing length".to_string(),
        ));
    }
    let size = u32::from_be_bytes([
        data[data.len() - 4],
        data[data.len() - 3],
        data[data.len() - 2],
        data[data.len() - 1],
    ]) as usize;
    if size < MIN_ENTRY_SIZE || size > data.len() {
        return Err(Error::Corrupted(format!(
            "trailing entry length {} out of range (buffer is {})",
            size,
            data.len()
        )));
    }

    unmarshal(&data[data.len() - size..])
}

/// Encoded size of an attribute set, including the leading count.
pub fn attributes_encoded_size(attrs: &BTreeMap<String, AttrValue>) -> usize {
    let mut size = 2;
    for (key, value) in attrs {
        size += 2 + key.len() + 4 + 1;
        size += match value {
            AttrValue::Str(s) => s.len(),
            AttrValue::Int(_) => 8,
            AttrValue::Bool(_) => 1,
            AttrValue::Bytes(b) => b.len(),
        };
    }
    size
}

/// Encode an attribute set: count, then `(key_len, key, value_len, value)`
/// per attribute. Shared with the persisted index record.
pub fn put_attributes(buf: &mut impl BufMut, attrs: &BTreeMap<String, AttrValue>) {
    buf.put_u16(attrs.len() as u16);
    for (key, value) in attrs {
        buf.put_u16(key.len() as u16);
        buf.put_slice(key.as_bytes());
        match value {
            AttrValue::Str(s) => {
                buf.put_u32(s.len() as u32 + 1);
                buf.put_u8(ATTR_TAG_STR);
                buf.put_slice(s.as_bytes());
            }
            AttrValue::Int(v) => {
                buf.put_u32(9);
                buf.put_u8(ATTR_TAG_INT);
                buf.put_i64(*v);
            }
            AttrValue::Bool(v) => {
                buf.put_u32(2);
                buf.put_u8(ATTR_TAG_BOOL);
                buf.put_u8(*v as u8);
            }
            AttrValue::Bytes(b) => {
                buf.put_u32(b.len() as u32 + 1);
                buf.put_u8(ATTR_TAG_BYTES);
                buf.put_slice(b);
            }
        }
    }
}

/// Decode an attribute set from the front of `buf`, advancing it.
pub fn take_attributes(buf: &mut &[u8]) -> Result<BTreeMap<String, AttrValue>> {
    let count = take_u16(buf)?;
    let mut attrs = BTreeMap::new();
    for _ in 0..count {
        let key_len = take_u16(buf)? as usize;
        let key = std::str::from_utf8(take(buf, key_len)?)
            .map_err(|_| Error::Corrupted("attribute key is not valid UTF-8".to_string()))?
            .to_string();

        let value_len = take_u32(buf)? as usize;
        if value_len == 0 {
            return Err(Error::Corrupted("empty attribute value".to_string()));
        }
        let raw = take(buf, value_len)?;
        let (tag, body) = (raw[0], &raw[1..]);
        let value = match tag {
            ATTR_TAG_STR => AttrValue::Str(
                std::str::from_utf8(body)
                    .map_err(|_| {
                        Error::Corrupted("string attribute is not valid UTF-8".to_string())
                    })?
                    .to_string(),
            ),
            ATTR_TAG_INT => {
                if body.len() != 8 {
                    return Err(Error::Corrupted(format!(
                        "integer attribute has {} body bytes",
                        body.len()
                    )));
                }
                let mut be = [0u8; 8];
                be.copy_from_slice(body);
                AttrValue::Int(i64::from_be_bytes(be))
            }
            ATTR_TAG_BOOL => {
                if body.len() != 1 {
                    return Err(Error::Corrupted(format!(
                        "bool attribute has {} body bytes",
                        body.len()
                    )));
                }
                AttrValue::Bool(body[0] != 0)
            }
            ATTR_TAG_BYTES => AttrValue::Bytes(Bytes::copy_from_slice(body)),
            other => {
                return Err(Error::Corrupted(format!("unknown attribute tag {}", other)));
            }
        };
        attrs.insert(key, value);
    }
    Ok(attrs)
}

// Checked cursor reads over a shrinking slice.

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::Corrupted(format!(
            "truncated entry: need {} bytes, have {}",
            n,
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N]> {
    let bytes = take(buf, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    Ok(take_array::<1>(buf)?[0])
}

fn take_u16(buf: &mut &[u8]) -> Result<u16> {
    Ok(u16::from_be_bytes(take_array::<2>(buf)?))
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    Ok(u32::from_be_bytes(take_array::<4>(buf)?))
}

fn take_i64(buf: &mut &[u8]) -> Result<i64> {
    Ok(i64::from_be_bytes(take_array::<8>(buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_attrs() -> BTreeMap<String, AttrValue> {
        let mut attrs = BTreeMap::new();
        attrs.insert("id".to_string(), AttrValue::Str("evt-001".to_string()));
        attrs.insert("partition".to_string(), AttrValue::Int(-3));
        attrs.insert("replay".to_string(), AttrValue::Bool(true));
        attrs.insert(
            "trace".to_string(),
            AttrValue::Bytes(Bytes::from(vec![0u8, 1, 255])),
        );
        attrs
    }

    fn sample_entry(seq: i64) -> Entry {
        Entry {
            seq,
            entry_type: EntryType::CloudEvent,
            timestamp: 1_700_000_000_000,
            attributes: sample_attrs(),
            payload: Bytes::from("payload-bytes"),
        }
    }

    fn encode(entry: &Entry) -> Vec<u8> {
        let mut buf = vec![0u8; encoded_size(entry)];
        let n = marshal_to(entry, &mut buf).unwrap();
        assert_eq!(n, buf.len());
        buf
    }

    // ---------------------------------------------------------------
    // Round-trips
    // ---------------------------------------------------------------

    #[test]
    fn test_roundtrip_with_attributes() {
        let entry = sample_entry(42);
        let buf = encode(&entry);

        let (n, decoded) = unmarshal(&buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_roundtrip_no_attributes_no_payload() {
        let entry = Entry::end(7, 99);
        let buf = encode(&entry);
        assert_eq!(buf.len(), MIN_ENTRY_SIZE);

        let (n, decoded) = unmarshal(&buf).unwrap();
        assert_eq!(n, MIN_ENTRY_SIZE);
        assert_eq!(decoded, entry);
        assert!(decoded.is_end());
    }

    #[test]
    fn test_roundtrip_large_payload() {
        let mut entry = sample_entry(0);
        entry.payload = Bytes::from(vec![0xAB; 64 * 1024]);
        let buf = encode(&entry);

        let (_, decoded) = unmarshal(&buf).unwrap();
        assert_eq!(decoded.payload.len(), 64 * 1024);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_roundtrip_all_attr_kinds() {
        let entry = sample_entry(1);
        let buf = encode(&entry);
        let (_, decoded) = unmarshal(&buf).unwrap();
        assert_eq!(decoded.attributes.len(), 4);
        assert_eq!(
            decoded.attributes["id"],
            AttrValue::Str("evt-001".to_string())
        );
        assert_eq!(decoded.attributes["partition"], AttrValue::Int(-3));
        assert_eq!(decoded.attributes["replay"], AttrValue::Bool(true));
        assert_eq!(
            decoded.attributes["trace"],
            AttrValue::Bytes(Bytes::from(vec![0u8, 1, 255]))
        );
    }

    #[test]
    fn test_unmarshal_consumes_one_entry() {
        let a = sample_entry(0);
        let b = sample_entry(1);
        let mut buf = encode(&a);
        buf.extend_from_slice(&encode(&b));

        let (n, first) = unmarshal(&buf).unwrap();
        assert_eq!(first.seq, 0);
        let (_, second) = unmarshal(&buf[n..]).unwrap();
        assert_eq!(second.seq, 1);
    }

    // ---------------------------------------------------------------
    // unmarshal_last
    // ---------------------------------------------------------------

    #[test]
    fn test_unmarshal_last_multi_entry_buffer() {
        let mut buf = Vec::new();
        for seq in 0..5 {
            buf.extend_from_slice(&encode(&sample_entry(seq)));
        }
        let last_size = encoded_size(&sample_entry(4));

        let (n, last) = unmarshal_last(&buf).unwrap();
        assert_eq!(n, last_size);
        assert_eq!(last.seq, 4);
    }

    #[test]
    fn test_unmarshal_last_single_entry() {
        let entry = Entry::end(3, 1);
        let buf = encode(&entry);
        let (n, decoded) = unmarshal_last(&buf).unwrap();
        assert_eq!(n, buf.len());
        assert!(decoded.is_end());
        assert_eq!(decoded.seq, 3);
    }

    #[test]
    fn test_unmarshal_last_short_buffer() {
        assert!(unmarshal_last(&[0u8; 3]).is_err());
    }

    // ---------------------------------------------------------------
    // Corruption
    // ---------------------------------------------------------------

    #[test]
    fn test_unmarshal_truncated_buffer() {
        let buf = encode(&sample_entry(0));
        let err = unmarshal(&buf[..buf.len() - 1]).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn test_unmarshal_trailing_length_mismatch() {
        let mut buf = encode(&sample_entry(0));
        let end = buf.len();
        buf[end - 1] ^= 0xFF;
        let err = unmarshal(&buf).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn test_unmarshal_unknown_type_tag() {
        let mut buf = encode(&sample_entry(0));
        buf[4] = 0x7F;
        let err = unmarshal(&buf).unwrap_err();
        assert!(matches!(err, Error::UnknownEntryType(0x7F)));
    }

    #[test]
    fn test_unmarshal_length_too_small() {
        let mut buf = encode(&sample_entry(0));
        buf[0..4].copy_from_slice(&(4u32).to_be_bytes());
        assert!(unmarshal(&buf).is_err());
    }

    #[test]
    fn test_unmarshal_unknown_attr_tag() {
        let mut attrs = BTreeMap::new();
        attrs.insert("k".to_string(), AttrValue::Bool(false));
        let entry = Entry {
            seq: 0,
            entry_type: EntryType::CloudEvent,
            timestamp: 0,
            attributes: attrs,
            payload: Bytes::new(),
        };
        let mut buf = encode(&entry);
        // attr layout after the fixed prelude: count(2) key_len(2) key(1)
        // value_len(4) tag(1); flip the tag byte.
        let tag_at = 4 + 1 + 8 + 8 + 2 + 2 + 1 + 4;
        assert_eq!(buf[tag_at], super::ATTR_TAG_BOOL);
        buf[tag_at] = 9;
        let err = unmarshal(&buf).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn test_marshal_to_buffer_too_small() {
        let entry = sample_entry(0);
        let mut buf = vec![0u8; encoded_size(&entry) - 1];
        let err = marshal_to(&entry, &mut buf).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { .. }));
    }

    // ---------------------------------------------------------------
    // Sizes
    // ---------------------------------------------------------------

    #[test]
    fn test_encoded_size_matches_payload_growth() {
        let mut entry = sample_entry(0);
        let base = encoded_size(&entry);
        entry.payload = Bytes::from(vec![0u8; entry.payload.len() + 10]);
        assert_eq!(encoded_size(&entry), base + 10);
    }

    #[test]
    fn test_attributes_size_matches_encoding() {
        let attrs = sample_attrs();
        let mut buf = bytes::BytesMut::new();
        put_attributes(&mut buf, &attrs);
        assert_eq!(buf.len(), attributes_encoded_size(&attrs));

        let mut cursor: &[u8] = &buf;
        let decoded = take_attributes(&mut cursor).unwrap();
        assert!(cursor.is_empty());
        assert_eq!(decoded, attrs);
    }
}
