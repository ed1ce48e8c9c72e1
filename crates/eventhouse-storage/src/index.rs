//! In-memory index of committed entries.
//!
//! One [`IndexRecord`] exists per committed non-terminal entry, holding
//! where the entry lives in the file, how long its encoding is, its
//! sequence number, and the attributes extracted from it at commit time.
//! The table is append-only; records are never mutated.
//!
//! On archival the whole table is serialized as a single index-typed
//! entry and written after the data region, so reopening an archived
//! block never rescans the data.
//!
//! ## Persisted Table Layout
//!
//! The index entry's payload (all integers big-endian):
//!
//! ```text
//! record_count u32
//! per record:
//!   offset i64, length i32, seq i64, attributes (shared wire encoding)
//! ```

use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use eventhouse_core::{codec, AttrValue, Entry, EntryType};
use std::collections::BTreeMap;

/// Index row for one committed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// File offset of the entry's first byte
    pub offset: i64,

    /// Encoded length of the entry
    pub length: i32,

    /// Sequence number
    pub seq: i64,

    /// Attributes extracted from the entry at commit time
    pub attributes: BTreeMap<String, AttrValue>,
}

impl IndexRecord {
    /// Build the index row for an entry decoded at `offset` with encoded
    /// length `length`.
    pub fn of_entry(offset: i64, length: i32, entry: &Entry) -> Self {
        Self {
            offset,
            length,
            seq: entry.seq,
            attributes: entry.attributes.clone(),
        }
    }
}

/// Serialize the index table as a single index-typed entry.
pub fn index_entry(records: &[IndexRecord], seq: i64, timestamp: i64) -> Entry {
    let mut payload = BytesMut::with_capacity(
        4 + records
            .iter()
            .map(|r| 8 + 4 + 8 + codec::attributes_encoded_size(&r.attributes))
            .sum::<usize>(),
    );
    payload.put_u32(records.len() as u32);
    for record in records {
        payload.put_i64(record.offset);
        payload.put_i32(record.length);
        payload.put_i64(record.seq);
        codec::put_attributes(&mut payload, &record.attributes);
    }

    Entry {
        seq,
        entry_type: EntryType::Index,
        timestamp,
        attributes: BTreeMap::new(),
        payload: payload.freeze(),
    }
}

/// Decode the index table out of an index-typed entry.
pub fn decode_index_entry(entry: &Entry) -> Result<Vec<IndexRecord>> {
    if entry.entry_type != EntryType::Index {
        return Err(Error::InvalidBlock(format!(
            "index region holds a {:?} entry",
            entry.entry_type
        )));
    }

    let mut buf: &[u8] = &entry.payload;
    let count = take_u32(&mut buf)? as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let offset = take_i64(&mut buf)?;
        let length = take_i32(&mut buf)?;
        let seq = take_i64(&mut buf)?;
        let attributes = codec::take_attributes(&mut buf)?;
        records.push(IndexRecord {
            offset,
            length,
            seq,
            attributes,
        });
    }
    if !buf.is_empty() {
        return Err(Error::InvalidBlock(format!(
            "{} trailing bytes after index table",
            buf.len()
        )));
    }
    Ok(records)
}

fn take_fixed<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::InvalidBlock("truncated index table".to_string()));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    let bytes = take_fixed(buf, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take_i32(buf: &mut &[u8]) -> Result<i32> {
    let bytes = take_fixed(buf, 4)?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take_i64(buf: &mut &[u8]) -> Result<i64> {
    let bytes = take_fixed(buf, 8)?;
    let mut be = [0u8; 8];
    be.copy_from_slice(bytes);
    Ok(i64::from_be_bytes(be))
}
