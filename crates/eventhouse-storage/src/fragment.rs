//! Fragment - an immutable byte range of encoded entries.
//!
//! Fragments are produced by the prepare phase and consumed by the commit
//! phase; between the two they travel through the replicator as part of
//! the consensus message. A fragment covers whole encoded entries only -
//! never a partial entry - and records the file offset its first byte is
//! destined for.

use crate::error::Result;
use bytes::Bytes;
use eventhouse_core::{codec, Entry};

/// An immutable byte range `[start_offset, end_offset)` holding one or
/// more encoded entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    start_offset: i64,
    payload: Bytes,
}

impl Fragment {
    /// Encode `entries` back-to-back into a single buffer destined for
    /// `start_offset`.
    pub fn new(start_offset: i64, entries: &[Entry]) -> Result<Self> {
        let total: usize = entries.iter().map(codec::encoded_size).sum();
        let mut buf = vec![0u8; total];
        let mut off = 0;
        for entry in entries {
            off += codec::marshal_to(entry, &mut buf[off..])?;
        }
        Ok(Self {
            start_offset,
            payload: Bytes::from(buf),
        })
    }

    /// Wrap already-encoded bytes, e.g. the log tail handed back by the
    /// replicator during recovery.
    pub fn from_payload(start_offset: i64, payload: Bytes) -> Self {
        Self {
            start_offset,
            payload,
        }
    }

    pub fn start_offset(&self) -> i64 {
        self.start_offset
    }

    pub fn end_offset(&self) -> i64 {
        self.start_offset + self.payload.len() as i64
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventhouse_core::EntryType;
    use std::collections::BTreeMap;

    fn stamped_entry(seq: i64, payload: &str) -> Entry {
        Entry::cloud_event(BTreeMap::new(), Bytes::from(payload.to_string())).stamped(
            EntryType::CloudEvent,
            seq,
            1_700_000_000_000,
        )
    }

    #[test]
    fn test_new_sums_entry_sizes() {
        let entries = vec![stamped_entry(0, "aa"), stamped_entry(1, "bbbb")];
        let expected: usize = entries.iter().map(codec::encoded_size).sum();

        let frag = Fragment::new(128, &entries).unwrap();
        assert_eq!(frag.start_offset(), 128);
        assert_eq!(frag.size(), expected);
        assert_eq!(frag.end_offset(), 128 + expected as i64);
    }

    #[test]
    fn test_payload_decodes_back() {
        let entries = vec![stamped_entry(5, "one"), stamped_entry(6, "two")];
        let frag = Fragment::new(64, &entries).unwrap();

        let (n, first) = codec::unmarshal(frag.payload()).unwrap();
        assert_eq!(first, entries[0]);
        let (_, second) = codec::unmarshal(&frag.payload()[n..]).unwrap();
        assert_eq!(second, entries[1]);
    }

    #[test]
    fn test_last_entry_recoverable() {
        let entries = vec![stamped_entry(0, "x"), stamped_entry(1, "y")];
        let frag = Fragment::new(64, &entries).unwrap();

        let (_, last) = codec::unmarshal_last(frag.payload()).unwrap();
        assert_eq!(last.seq, 1);
    }

    #[test]
    fn test_empty_fragment() {
        let frag = Fragment::new(64, &[]).unwrap();
        assert_eq!(frag.size(), 0);
        assert_eq!(frag.end_offset(), 64);
    }

    #[test]
    fn test_from_payload() {
        let entries = vec![stamped_entry(0, "z")];
        let built = Fragment::new(96, &entries).unwrap();
        let wrapped = Fragment::from_payload(96, Bytes::copy_from_slice(built.payload()));
        assert_eq!(wrapped, built);
    }
}
