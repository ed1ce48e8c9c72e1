//! Two-Phase Append Protocol
//!
//! The replicator drives appends in two phases. Prepare assigns sequence
//! numbers and builds fragments against a detached copy of the append
//! context, so any number of prepares may run while commits for older
//! fragments are still in flight. Commit receives the fragments in the
//! order consensus fixed them, absorbs redelivered byte ranges, verifies
//! the rest, writes them, and advances the canonical context.
//!
//! ## Why detached contexts
//!
//! Holding the block lock across prepare + consensus + commit would
//! serialize the pipeline. Instead [`Block::new_append_context`] hands out
//! a value-typed copy that reflects everything the replicator has ordered
//! so far (not just what is durable); prepare mutates the copy, the
//! replicator carries it in its messages, and commit reconciles against
//! the canonical instance. A detached context must never be shared
//! between tasks.
//!
//! ## Commit ordering guarantees
//!
//! - Data bytes hit the file before their index rows become visible: the
//!   write completes before the block lock is taken.
//! - The archived flag flips only after the end marker's bytes are on
//!   disk.
//! - Header persistence runs in the background; the commit returns
//!   without waiting for it.

use super::{ArchiveStat, Block, IndexRecord};
use crate::error::{Error, Result};
use crate::fragment::Fragment;
use crate::fs;
use crate::header::BlockHeader;
use crate::index;
use eventhouse_core::{codec, Entry, EntryType};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Get current timestamp in milliseconds
fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Detached forward-progress state of a block: the next sequence number,
/// the next write offset, and whether an end marker has been prepared.
///
/// Copies are cheap values owned by a single caller; the canonical
/// instance lives inside the block and is only advanced by commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendContext {
    seq: i64,
    offset: i64,
    archived: bool,
}

impl AppendContext {
    pub(super) fn archived_at(seq: i64, offset: i64) -> Self {
        Self {
            seq,
            offset,
            archived: true,
        }
    }

    /// Next sequence number this context will assign.
    pub fn next_seq(&self) -> i64 {
        self.seq
    }

    /// Next file offset this context will write at.
    pub fn write_offset(&self) -> i64 {
        self.offset
    }

    pub fn archived(&self) -> bool {
        self.archived
    }

    fn size(&self, data_offset: i64) -> i64 {
        self.offset - data_offset
    }
}

impl Block {
    /// Hand out a detached append context.
    ///
    /// With `last` (the tail fragment of the replicator's log, during
    /// recovery or leader handoff) the context continues from that
    /// fragment's final entry; otherwise it copies the canonical context.
    pub fn new_append_context(&self, last: Option<&Fragment>) -> Result<AppendContext> {
        if let Some(frag) = last {
            let (_, entry) = codec::unmarshal_last(frag.payload())?;
            return Ok(AppendContext {
                seq: entry.seq + 1,
                offset: frag.end_offset(),
                archived: entry.is_end(),
            });
        }

        let core = self.core.read().unwrap();
        Ok(AppendContext {
            seq: core.seq,
            offset: core.offset,
            archived: self.archived.load(Ordering::Acquire),
        })
    }

    /// Stamp `entries` with dense sequence numbers and the current
    /// wall-clock timestamp, and encode them into one fragment at the
    /// context's write offset.
    ///
    /// Returns the assigned sequence numbers, the fragment, and whether
    /// the block is now past capacity (a hint to schedule archival).
    /// Performs no I/O and takes no block lock.
    pub fn prepare_append(
        &self,
        actx: &mut AppendContext,
        entries: &[Entry],
    ) -> Result<(Vec<i64>, Fragment, bool)> {
        let now = now_ms();
        let mut seqs = Vec::with_capacity(entries.len());
        let mut stamped = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let seq = actx.seq + i as i64;
            stamped.push(entry.stamped(EntryType::CloudEvent, seq, now));
            seqs.push(seq);
        }

        let frag = Fragment::new(actx.offset, &stamped)?;
        actx.offset += frag.size() as i64;
        actx.seq += entries.len() as i64;

        let full = actx.size(self.data_offset) >= self.capacity;
        Ok((seqs, frag, full))
    }

    /// Emit the end marker at the context's current sequence number and
    /// mark the detached context archived.
    pub fn prepare_archive(&self, actx: &mut AppendContext) -> Result<Fragment> {
        let end = Entry::end(actx.seq, now_ms());
        let frag = Fragment::new(actx.offset, std::slice::from_ref(&end))?;

        actx.offset += frag.size() as i64;
        actx.seq += 1;
        actx.archived = true;

        Ok(frag)
    }

    /// Apply fragments in the order the replicator fixed them.
    ///
    /// Byte ranges that are already durable are silently absorbed -
    /// redelivery after a retry or leader change is normal. Returns
    /// whether this commit archived the block.
    pub async fn commit_append(
        &self,
        cancel: &CancellationToken,
        frags: &[Fragment],
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // The replicator serializes commits, so this snapshot stays valid
        // until the state advance below.
        let (snap_seq, snap_offset) = {
            let core = self.core.read().unwrap();
            (core.seq, core.offset)
        };

        let frags = self.trim_fragments(snap_offset, frags)?;
        if frags.is_empty() {
            return Ok(false);
        }
        if self.archived.load(Ordering::Acquire) {
            return Err(Error::Archived(self.id));
        }

        self.check_fragments(snap_offset, frags)?;

        // Coalesce into one buffer, relative to the first fragment.
        let total: usize = frags.iter().map(Fragment::size).sum();
        let base = frags[0].start_offset();
        let mut data = vec![0u8; total];
        for frag in frags {
            let at = (frag.start_offset() - base) as usize;
            data[at..at + frag.size()].copy_from_slice(frag.payload());
        }

        let (indexes, entry_count, archived) = self.build_indexes(snap_seq, base, &data)?;
        if !archived && indexes.is_empty() {
            return Ok(false);
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Write only the suffix that is not yet durable.
        let skip = (snap_offset - base) as usize;
        let buf = data.split_off(skip);
        let written = buf.len() as i64;
        {
            let file = Arc::clone(&self.file);
            let off = snap_offset as u64;
            tokio::task::spawn_blocking(move || fs::write_all_at(&file, &buf, off))
                .await
                .map_err(|e| Error::Internal(format!("write task failed: {e}")))??;
        }

        // Bytes are durable; from here on cancellation is disregarded and
        // the in-memory state must advance.
        let snapshot = {
            let mut core = self.core.write().unwrap();
            core.indexes.extend(indexes);
            core.seq += entry_count;
            core.offset += written;
            if archived {
                self.archived.store(true, Ordering::Release);
                Some((
                    AppendContext::archived_at(core.seq, core.offset),
                    Arc::<[IndexRecord]>::from(core.indexes.clone()),
                ))
            } else {
                None
            }
        };

        if let Some((m, table)) = snapshot {
            let index_length = self.spawn_archive_persist(m, Arc::clone(&table));
            if let Some(listener) = &self.listener {
                listener.on_archived(ArchiveStat {
                    block_id: self.id,
                    first_seq: self.first_seq,
                    last_seq: table.last().map_or(self.first_seq - 1, |r| r.seq),
                    entry_count: table.len() as u32,
                    index_offset: m.offset,
                    index_length,
                    data_bytes: m.offset - self.data_offset,
                });
            }
        }

        Ok(archived)
    }

    /// Drop leading fragments whose bytes are already durable. A gap
    /// between the canonical offset and the first useful fragment means
    /// the replicator lost ordering.
    fn trim_fragments<'a>(&self, offset: i64, frags: &'a [Fragment]) -> Result<&'a [Fragment]> {
        for (i, frag) in frags.iter().enumerate() {
            if frag.end_offset() <= offset {
                info!(
                    block_id = self.id,
                    expected = offset,
                    fragment_start_offset = frag.start_offset(),
                    fragment_end_offset = frag.end_offset(),
                    "fragment already written, skipping"
                );
                continue;
            }
            if frag.start_offset() > offset {
                error!(
                    block_id = self.id,
                    expected = offset,
                    found = frag.start_offset(),
                    "missing fragments"
                );
                return Err(Error::Internal("missing fragments".to_string()));
            }
            return Ok(&frags[i..]);
        }
        Ok(&[])
    }

    /// Adjacent fragments must meet exactly. The head is not re-checked
    /// against the canonical offset: trimming already guaranteed overlap.
    fn check_fragments(&self, _offset: i64, frags: &[Fragment]) -> Result<()> {
        // if frags[0].start_offset() > _offset {
        //     error!(
        //         block_id = self.id,
        //         expected = _offset,
        //         found = frags[0].start_offset(),
        //         "missing fragments"
        //     );
        //     return Err(Error::Internal("missing fragments".to_string()));
        // }

        for pair in frags.windows(2) {
            let prev_end = pair[0].end_offset();
            let next_start = pair[1].start_offset();
            if prev_end != next_start {
                error!(
                    block_id = self.id,
                    previous_end_offset = prev_end,
                    next_start_offset = next_start,
                    "discontinuous fragments"
                );
                return Err(Error::Internal("discontinuous fragments".to_string()));
            }
        }
        Ok(())
    }

    /// Decode the coalesced buffer and build index rows for the entries
    /// that advance the sequence. Entries below the expected sequence are
    /// the tail of an already-committed fragment and are skipped, but
    /// only before the first new entry; anything else out of order is
    /// corruption. The end marker must be the last byte of the buffer.
    fn build_indexes(
        &self,
        snap_seq: i64,
        base: i64,
        data: &[u8],
    ) -> Result<(Vec<IndexRecord>, i64, bool)> {
        let mut indexes = Vec::new();
        let mut expected = snap_seq;
        let mut archived = false;

        let mut off = 0usize;
        while off < data.len() {
            let (n, entry) = codec::unmarshal(&data[off..])?;
            if entry.seq != expected {
                if entry.seq < expected && indexes.is_empty() {
                    off += n;
                    continue;
                }
                return Err(Error::Corrupted(format!(
                    "expected sequence {}, found {}",
                    expected, entry.seq
                )));
            }
            expected += 1;

            if entry.is_end() {
                if off + n != data.len() {
                    return Err(Error::Corrupted(
                        "entry after end marker".to_string(),
                    ));
                }
                archived = true;
                break;
            }

            indexes.push(IndexRecord::of_entry(base + off as i64, n as i32, &entry));
            off += n;
        }

        Ok((indexes, expected - snap_seq, archived))
    }

    /// Persist the index region and the header snapshot off the commit
    /// path. Failures are logged; recovery rebuilds by scanning if the
    /// snapshot never lands. Returns the encoded index length.
    pub(super) fn spawn_archive_persist(
        &self,
        m: AppendContext,
        table: Arc<[IndexRecord]>,
    ) -> i32 {
        let idx_entry = index::index_entry(&table, m.seq, now_ms());
        let idx_size = codec::encoded_size(&idx_entry);

        let mut header = BlockHeader {
            id: self.id,
            capacity: self.capacity,
            data_offset: self.data_offset as u32,
            first_seq: self.first_seq,
            last_seq: m.seq - 1,
            archived: true,
            index_offset: m.offset,
            index_length: idx_size as i32,
        };

        let file = Arc::clone(&self.file);
        let region = Arc::clone(&self.index_region);
        let block_id = self.id;
        let handle = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; idx_size];
            let index_written = codec::marshal_to(&idx_entry, &mut buf)
                .map_err(Error::from)
                .and_then(|_| fs::write_all_at(&file, &buf, m.offset as u64).map_err(Error::from));
            match index_written {
                Ok(()) => {
                    let mut region = region.lock().unwrap();
                    region.offset = m.offset;
                    region.length = idx_size as i32;
                }
                Err(e) => {
                    error!(block_id, error = %e, "failed to persist index region");
                    header.index_offset = 0;
                    header.index_length = 0;
                }
            }

            if let Err(e) =
                fs::write_all_at(&file, &header.encode(), 0).and_then(|()| file.sync_data())
            {
                error!(block_id, error = %e, "failed to persist block header");
            }
        });

        *self.persist_task.lock().unwrap() = Some(handle);
        idx_size as i32
    }
}
