//! EventHouse Storage Layer
//!
//! This crate implements the block - the append-only, sequence-numbered
//! container that stores serialized events on disk. A replication layer
//! above it orders byte ranges ("fragments") and hands them down for
//! durable persistence; the block validates, writes and indexes them, and
//! eventually seals itself ("archives") so that no further entries can be
//! appended.
//!
//! ## Block File Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Header (64 bytes)                                        │
//! │ - Magic bytes: "EVHB", version, block id, capacity       │
//! │ - First/last sequence numbers, archived flag             │
//! │ - Index region offset + length (set once archived)       │
//! │ - CRC32 checksum                                         │
//! ├──────────────────────────────────────────────────────────┤
//! │ Entries, packed in commit order                          │
//! │ [data_offset, index_offset)                              │
//! ├──────────────────────────────────────────────────────────┤
//! │ Index entry (present only once archived)                 │
//! │ [index_offset, index_offset + index_length)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two-Phase Append
//!
//! Appending is split so that no lock is held while consensus is running:
//!
//! 1. **Prepare** - [`Block::prepare_append`] stamps sequence numbers and
//!    timestamps and encodes entries into an immutable [`Fragment`],
//!    mutating only the caller's detached [`AppendContext`]. No I/O, no
//!    block lock.
//! 2. **Commit** - [`Block::commit_append`] receives the fragments the
//!    replicator ordered, drops byte ranges that are already durable
//!    (redelivery after retries is normal), verifies contiguity and
//!    sequence density, writes the new suffix at the canonical write
//!    offset, and only then advances the canonical state under the block
//!    mutex.
//!
//! Archival goes through the same pair: [`Block::prepare_archive`] emits
//! the terminal end entry, and the commit that applies it snapshots the
//! block state, persists the index region and header in the background,
//! and notifies the [`ArchiveListener`].
//!
//! ## Crash Consistency
//!
//! Data bytes are written before index entries become visible in memory,
//! so readers never observe an index row whose bytes are not on disk. On
//! reopen, an archived block loads its index from the index region; an
//! unarchived block rebuilds it by scanning the data region up to the
//! durable tail.

pub mod block;
pub mod config;
pub mod error;
pub mod fragment;
pub mod header;
pub mod index;

mod fs;

pub use block::{AppendContext, ArchiveListener, ArchiveStat, Block};
pub use config::BlockConfig;
pub use error::{Error, Result};
pub use fragment::Fragment;
pub use header::{BlockHeader, BLOCK_MAGIC, BLOCK_VERSION, HEADER_SIZE};
pub use index::IndexRecord;
