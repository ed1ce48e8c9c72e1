//! Storage Error Types
//!
//! ## Error Categories
//!
//! ### Commit-fatal errors
//! - `Codec` / `Corrupted`: an entry failed to decode, a sequence number
//!   broke density, or an end marker was not the last entry. The block
//!   needs inspection.
//! - `Internal`: the replicator delivered fragments with a gap or a
//!   discontinuity. Indicates a bug above the block.
//! - `Archived`: new bytes were committed into a sealed block.
//!
//! ### Retriable errors
//! - `Io`: a file operation failed; the canonical state is untouched and
//!   the commit can be retried as-is.
//! - `Cancelled`: the caller's token fired before the durable write.
//!
//! ### Open/validation errors
//! - `InvalidMagic`, `UnsupportedVersion`, `CrcMismatch`, `InvalidBlock`:
//!   the file is not a block this version can load.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted entry: {0}")]
    Codec(#[from] eventhouse_core::Error),

    #[error("corrupted fragment: {0}")]
    Corrupted(String),

    #[error("invariant violation: {0}")]
    Internal(String),

    #[error("block {0} is archived")]
    Archived(u64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("unsupported block version: {0}")]
    UnsupportedVersion(u16),

    #[error("header CRC mismatch")]
    CrcMismatch,

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("sequence number not found: {0}")]
    SeqNotFound(i64),
}
