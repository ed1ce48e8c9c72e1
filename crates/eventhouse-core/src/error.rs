//! Error Types for EventHouse Core
//!
//! Codec failures all surface as variants of [`Error`]. `Corrupted` covers
//! any inconsistency inside an encoded entry (bad lengths, truncated
//! buffers, malformed attribute values); unknown type tags get their own
//! variant so callers can report the offending byte.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("corrupted entry: {0}")]
    Corrupted(String),

    #[error("unknown entry type: {0}")]
    UnknownEntryType(u8),

    #[error("buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },
}
