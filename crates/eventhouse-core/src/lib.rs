//! EventHouse Core
//!
//! Shared data model for the EventHouse storage engine: the `Entry` type
//! (one event plus its storage metadata) and the self-delimiting wire codec
//! used to put entries on disk.
//!
//! ## What is an Entry?
//!
//! An entry is a single event in a block, carrying:
//! - **seq**: monotonically increasing sequence number within a block
//! - **entry_type**: cloud event, end-of-block marker, or index record
//! - **timestamp**: when the entry was stamped (milliseconds since epoch)
//! - **attributes**: string-keyed scalar metadata, extracted into the index
//! - **payload**: the serialized event body (arbitrary bytes)
//!
//! ## Why the codec lives here
//!
//! Both the storage layer (writing fragments, rebuilding indexes) and any
//! future reader tooling need the exact same byte layout, so the codec is
//! defined next to the type it encodes. See [`codec`] for the format.

pub mod codec;
pub mod entry;
pub mod error;

pub use entry::{AttrValue, Entry, EntryType};
pub use error::{Error, Result};
