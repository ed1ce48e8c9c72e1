//! Sequence-number read path.
//!
//! Readers resolve index rows under the shared lock, then read the byte
//! range without it. Because commits write data before publishing index
//! rows, a resolved row always points at bytes that are on disk.

use super::Block;
use crate::error::{Error, Result};
use crate::fs;
use eventhouse_core::{codec, Entry};
use std::sync::Arc;

impl Block {
    /// Read up to `max` entries starting at sequence number `seq`.
    pub async fn read(&self, seq: i64, max: usize) -> Result<Vec<Entry>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        // Snapshot the index rows covering the request. Sequence numbers
        // are dense, so the row for `seq` sits at a fixed position.
        let records = {
            let core = self.core.read().unwrap();
            let count = core.indexes.len() as i64;
            if seq < self.first_seq || seq >= self.first_seq + count {
                return Err(Error::SeqNotFound(seq));
            }
            let at = (seq - self.first_seq) as usize;
            let end = (at + max).min(core.indexes.len());
            core.indexes[at..end].to_vec()
        };

        // Entries are packed back-to-back, so one contiguous read covers
        // the whole range.
        let first = &records[0];
        let last = &records[records.len() - 1];
        let start = first.offset;
        let len = (last.offset + last.length as i64 - start) as usize;

        let file = Arc::clone(&self.file);
        let buf = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut buf = vec![0u8; len];
            fs::read_exact_at(&file, &mut buf, start as u64)?;
            Ok(buf)
        })
        .await
        .map_err(|e| Error::Internal(format!("read task failed: {e}")))??;

        let mut entries = Vec::with_capacity(records.len());
        let mut off = 0usize;
        for _ in 0..records.len() {
            let (n, entry) = codec::unmarshal(&buf[off..])?;
            entries.push(entry);
            off += n;
        }
        Ok(entries)
    }
}
