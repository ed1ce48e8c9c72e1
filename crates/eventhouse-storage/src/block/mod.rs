//! Block - the append-only container for one run of entries.
//!
//! A block owns a single file, the canonical append context (next
//! sequence number and write offset), the in-memory index table, and the
//! header. It exposes the two-phase append protocol
//! ([`Block::prepare_append`] / [`Block::commit_append`]) and the
//! sequence-number read path ([`Block::read`]).
//!
//! ## Concurrency
//!
//! One `RwLock` protects the canonical context and the index table; the
//! archived flag is additionally mirrored in an `AtomicBool` so pollers
//! never take the lock. Prepare phases touch only the caller's detached
//! context and take no lock at all. The replicator serializes commits, so
//! at most one `commit_append` is in flight per block; the lock still
//! guards against readers interleaving with the commit's state advance.
//!
//! ## Lifecycle
//!
//! [`Block::create`] writes the initial header; [`Block::open`] restores
//! state from the header, loading the index region for archived blocks
//! and rebuilding the index by scanning the data region otherwise.
//! [`Block::close`] joins the background archival persistence and writes
//! a final header snapshot.

mod append;
mod read;

pub use append::AppendContext;

use crate::config::BlockConfig;
use crate::error::{Error, Result};
use crate::fs;
use crate::header::{BlockHeader, HEADER_SIZE};
use crate::index::{self, IndexRecord};
use eventhouse_core::codec;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Summary of an archived block, passed to the [`ArchiveListener`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStat {
    pub block_id: u64,
    /// First sequence number in the block
    pub first_seq: i64,
    /// Sequence number of the last event entry
    pub last_seq: i64,
    /// Number of event entries (the end marker is not counted)
    pub entry_count: u32,
    pub index_offset: i64,
    pub index_length: i32,
    /// Bytes of entry data, end marker included
    pub data_bytes: i64,
}

/// Callback fired exactly once when a block archives.
pub trait ArchiveListener: Send + Sync {
    fn on_archived(&self, stat: ArchiveStat);
}

/// Canonical mutable state, guarded by the block lock.
struct BlockCore {
    /// Next sequence number to commit
    seq: i64,
    /// Next file offset to write
    offset: i64,
    /// One row per committed event entry, ordered by offset
    indexes: Vec<IndexRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
struct IndexRegion {
    offset: i64,
    length: i32,
}

/// One append-only file hosting a contiguous sequence-numbered run of
/// entries.
pub struct Block {
    id: u64,
    path: PathBuf,
    file: Arc<File>,
    data_offset: i64,
    capacity: i64,
    first_seq: i64,

    core: RwLock<BlockCore>,
    archived: AtomicBool,
    index_region: Arc<Mutex<IndexRegion>>,

    /// Background index/header persistence, joined on close
    persist_task: Mutex<Option<JoinHandle<()>>>,
    listener: Option<Arc<dyn ArchiveListener>>,
}

impl Block {
    /// Create a new block file. Fails if the path already exists.
    pub async fn create(path: impl AsRef<Path>, id: u64, config: BlockConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        let file = file.into_std().await;

        let header = BlockHeader {
            id,
            capacity: config.capacity,
            data_offset: HEADER_SIZE as u32,
            first_seq: 0,
            last_seq: -1,
            archived: false,
            index_offset: 0,
            index_length: 0,
        };
        fs::write_all_at(&file, &header.encode(), 0)?;
        file.sync_all()?;

        info!(
            block_id = id,
            path = ?path,
            capacity = config.capacity,
            "block created"
        );

        Ok(Self {
            id,
            path,
            file: Arc::new(file),
            data_offset: HEADER_SIZE as i64,
            capacity: config.capacity,
            first_seq: 0,
            core: RwLock::new(BlockCore {
                seq: 0,
                offset: HEADER_SIZE as i64,
                indexes: Vec::new(),
            }),
            archived: AtomicBool::new(false),
            index_region: Arc::new(Mutex::new(IndexRegion::default())),
            persist_task: Mutex::new(None),
            listener: None,
        })
    }

    /// Open an existing block file and restore its state.
    ///
    /// Archived blocks with a persisted index region load it directly.
    /// Everything else rebuilds the index by scanning the data region up
    /// to the durable tail: the first decode failure, sequence
    /// discontinuity, or end marker.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await?;
        let file = Arc::new(file.into_std().await);

        let mut head = [0u8; HEADER_SIZE];
        fs::read_exact_at(&file, &mut head, 0)?;
        let header = BlockHeader::decode(&head)?;
        let data_offset = header.data_offset as i64;

        let block = if header.archived && header.index_length > 0 {
            let mut buf = vec![0u8; header.index_length as usize];
            fs::read_exact_at(&file, &mut buf, header.index_offset as u64)?;
            let (_, entry) = codec::unmarshal(&buf)?;
            let indexes = index::decode_index_entry(&entry)?;

            info!(
                block_id = header.id,
                entry_count = indexes.len(),
                "block opened from index region"
            );

            Self {
                id: header.id,
                path,
                file,
                data_offset,
                capacity: header.capacity,
                first_seq: header.first_seq,
                core: RwLock::new(BlockCore {
                    seq: header.last_seq + 1,
                    offset: header.index_offset,
                    indexes,
                }),
                archived: AtomicBool::new(true),
                index_region: Arc::new(Mutex::new(IndexRegion {
                    offset: header.index_offset,
                    length: header.index_length,
                })),
                persist_task: Mutex::new(None),
                listener: None,
            }
        } else {
            let file_len = file.metadata()?.len() as i64;
            let scan = scan_data_region(&file, &header, data_offset, file_len)?;

            info!(
                block_id = header.id,
                entry_count = scan.indexes.len(),
                tail_offset = scan.offset,
                archived = scan.archived,
                "block index rebuilt by scan"
            );

            let block = Self {
                id: header.id,
                path,
                file,
                data_offset,
                capacity: header.capacity,
                first_seq: header.first_seq,
                core: RwLock::new(BlockCore {
                    seq: scan.seq,
                    offset: scan.offset,
                    indexes: scan.indexes,
                }),
                archived: AtomicBool::new(scan.archived),
                index_region: Arc::new(Mutex::new(IndexRegion::default())),
                persist_task: Mutex::new(None),
                listener: None,
            };

            // The end marker made it to disk but the header snapshot did
            // not; redo the archival persistence.
            if scan.archived {
                let (snapshot, table) = {
                    let core = block.core.read().unwrap();
                    (
                        AppendContext::archived_at(core.seq, core.offset),
                        Arc::<[IndexRecord]>::from(core.indexes.clone()),
                    )
                };
                block.spawn_archive_persist(snapshot, table);
            }

            block
        };

        Ok(block)
    }

    /// Attach the archival listener. Must be called before the block is
    /// shared.
    pub fn with_listener(mut self, listener: Arc<dyn ArchiveListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Join background persistence and write a final header snapshot.
    pub async fn close(&self) -> Result<()> {
        let task = self.persist_task.lock().unwrap().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(block_id = self.id, error = %e, "archival persistence task failed");
            }
        }

        let header = self.header_snapshot();
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            fs::write_all_at(&file, &header.encode(), 0)?;
            file.sync_all()
        })
        .await
        .map_err(|e| Error::Internal(format!("close task failed: {e}")))??;

        info!(block_id = self.id, "block closed");
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn data_offset(&self) -> i64 {
        self.data_offset
    }

    pub fn first_seq(&self) -> i64 {
        self.first_seq
    }

    /// Lock-free archived check.
    pub fn archived(&self) -> bool {
        self.archived.load(Ordering::Acquire)
    }

    /// Number of committed event entries.
    pub fn entry_count(&self) -> usize {
        self.core.read().unwrap().indexes.len()
    }

    /// Index region `(offset, length)`; zero until the archival
    /// persistence has run.
    pub fn index_region(&self) -> (i64, i32) {
        let region = self.index_region.lock().unwrap();
        (region.offset, region.length)
    }

    fn header_snapshot(&self) -> BlockHeader {
        let core = self.core.read().unwrap();
        let region = self.index_region.lock().unwrap();
        BlockHeader {
            id: self.id,
            capacity: self.capacity,
            data_offset: self.data_offset as u32,
            first_seq: self.first_seq,
            last_seq: core.seq - 1,
            archived: self.archived.load(Ordering::Acquire),
            index_offset: region.offset,
            index_length: region.length,
        }
    }
}

struct ScanResult {
    seq: i64,
    offset: i64,
    indexes: Vec<IndexRecord>,
    archived: bool,
}

/// Walk the data region entry by entry until the durable tail.
fn scan_data_region(
    file: &File,
    header: &BlockHeader,
    data_offset: i64,
    file_len: i64,
) -> Result<ScanResult> {
    let mut result = ScanResult {
        seq: header.first_seq,
        offset: data_offset,
        indexes: Vec::new(),
        archived: false,
    };
    if file_len <= data_offset {
        return Ok(result);
    }

    let mut data = vec![0u8; (file_len - data_offset) as usize];
    fs::read_exact_at(file, &mut data, data_offset as u64)?;

    let mut off = 0usize;
    while off < data.len() {
        let Ok((n, entry)) = codec::unmarshal(&data[off..]) else {
            break;
        };
        if entry.seq != result.seq {
            break;
        }
        result.seq += 1;
        off += n;
        if entry.is_end() {
            result.archived = true;
            break;
        }
        result
            .indexes
            .push(IndexRecord::of_entry(data_offset + (off - n) as i64, n as i32, &entry));
    }
    result.offset = data_offset + off as i64;

    Ok(result)
}
