//! Entry Data Structure
//!
//! This module defines the `Entry` type - the unit of data stored in a
//! block - together with its type tag and attribute values.
//!
//! ## Structure
//! Each entry contains:
//! - **seq**: sequence number within the block (dense, strictly increasing)
//! - **entry_type**: `CloudEvent` for user events, `End` for the terminal
//!   marker of an archived block, `Index` for the persisted index record
//! - **timestamp**: stamped at prepare time (milliseconds since epoch)
//! - **attributes**: string-keyed scalars, copied into the in-memory index
//!   when the entry is committed
//! - **payload**: the event body (arbitrary bytes)
//!
//! ## Design Decisions
//! - Uses `bytes::Bytes` for the payload so stamping and fragment building
//!   never copy event bodies
//! - Attributes are a `BTreeMap` so encoding is deterministic
//! - `seq` and `timestamp` are `i64` to match the on-disk format

use bytes::Bytes;
use std::collections::BTreeMap;

/// Type tag of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// A user event
    CloudEvent = 1,
    /// Terminal marker; an archived block ends with exactly one of these
    End = 2,
    /// The persisted index record written after archival
    Index = 3,
}

impl TryFrom<u8> for EntryType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EntryType::CloudEvent),
            2 => Ok(EntryType::End),
            3 => Ok(EntryType::Index),
            _ => Err(crate::Error::UnknownEntryType(value)),
        }
    }
}

/// A scalar attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Bytes(Bytes),
}

/// A single entry in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Sequence number within the block
    pub seq: i64,

    /// Type tag
    pub entry_type: EntryType,

    /// Timestamp in milliseconds since epoch, stamped at prepare time
    pub timestamp: i64,

    /// String-keyed scalar metadata
    pub attributes: BTreeMap<String, AttrValue>,

    /// Payload (event body)
    pub payload: Bytes,
}

impl Entry {
    /// Create an unstamped cloud-event entry; seq and timestamp are
    /// assigned when the entry goes through the prepare phase.
    pub fn cloud_event(attributes: BTreeMap<String, AttrValue>, payload: Bytes) -> Self {
        Self {
            seq: 0,
            entry_type: EntryType::CloudEvent,
            timestamp: 0,
            attributes,
            payload,
        }
    }

    /// Create the terminal marker of a block. Carries no payload.
    pub fn end(seq: i64, timestamp: i64) -> Self {
        Self {
            seq,
            entry_type: EntryType::End,
            timestamp,
            attributes: BTreeMap::new(),
            payload: Bytes::new(),
        }
    }

    /// Copy of this entry with type, sequence number and timestamp filled in.
    pub fn stamped(&self, entry_type: EntryType, seq: i64, timestamp: i64) -> Self {
        Self {
            seq,
            entry_type,
            timestamp,
            attributes: self.attributes.clone(),
            payload: self.payload.clone(),
        }
    }

    pub fn is_end(&self) -> bool {
        self.entry_type == EntryType::End
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // EntryType
    // ---------------------------------------------------------------

    #[test]
    fn test_entry_type_repr() {
        assert_eq!(EntryType::CloudEvent as u8, 1);
        assert_eq!(EntryType::End as u8, 2);
        assert_eq!(EntryType::Index as u8, 3);
    }

    #[test]
    fn test_entry_type_try_from_valid() {
        assert_eq!(EntryType::try_from(1u8).unwrap(), EntryType::CloudEvent);
        assert_eq!(EntryType::try_from(2u8).unwrap(), EntryType::End);
        assert_eq!(EntryType::try_from(3u8).unwrap(), EntryType::Index);
    }

    #[test]
    fn test_entry_type_try_from_invalid() {
        for bad in [0u8, 4, 100, u8::MAX] {
            let err = EntryType::try_from(bad).unwrap_err();
            let msg = format!("{}", err);
            assert!(msg.contains(&bad.to_string()));
        }
    }

    // ---------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------

    #[test]
    fn test_cloud_event_unstamped() {
        let entry = Entry::cloud_event(BTreeMap::new(), Bytes::from("hello"));
        assert_eq!(entry.seq, 0);
        assert_eq!(entry.timestamp, 0);
        assert_eq!(entry.entry_type, EntryType::CloudEvent);
        assert_eq!(entry.payload, Bytes::from("hello"));
        assert!(!entry.is_end());
    }

    #[test]
    fn test_end_entry_shape() {
        let entry = Entry::end(42, 1_700_000_000_000);
        assert_eq!(entry.seq, 42);
        assert_eq!(entry.timestamp, 1_700_000_000_000);
        assert!(entry.is_end());
        assert!(entry.payload.is_empty());
        assert!(entry.attributes.is_empty());
    }

    #[test]
    fn test_stamped_overrides_metadata_only() {
        let mut attrs = BTreeMap::new();
        attrs.insert("source".to_string(), AttrValue::Str("sensor-1".into()));
        let entry = Entry::cloud_event(attrs.clone(), Bytes::from("body"));

        let stamped = entry.stamped(EntryType::CloudEvent, 7, 123);
        assert_eq!(stamped.seq, 7);
        assert_eq!(stamped.timestamp, 123);
        assert_eq!(stamped.attributes, attrs);
        assert_eq!(stamped.payload, entry.payload);
    }

    #[test]
    fn test_attr_value_eq() {
        assert_eq!(AttrValue::Int(5), AttrValue::Int(5));
        assert_ne!(AttrValue::Int(5), AttrValue::Int(6));
        assert_ne!(
            AttrValue::Str("5".to_string()),
            AttrValue::Bytes(Bytes::from("5"))
        );
    }
}
