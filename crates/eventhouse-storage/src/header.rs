//! Block Header
//!
//! The first 64 bytes of a block file. The header is written once at
//! creation, snapshotted again when the block archives, and re-read on
//! open to restore state.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Magic bytes: "EVHB" (4 bytes)                            │
//! │ Version (2 bytes)                                        │
//! │ Block id (8 bytes)                                       │
//! │ Capacity (8 bytes)                                       │
//! │ Data offset (4 bytes)                                    │
//! │ First sequence number (8 bytes)                          │
//! │ Last sequence number (8 bytes)                           │
//! │ Archived flag (1 byte)                                   │
//! │ Index region offset (8 bytes)                            │
//! │ Index region length (4 bytes)                            │
//! │ Reserved (5 bytes)                                       │
//! │ CRC32 of the preceding 60 bytes (4 bytes)                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `last_seq` is the last sequence number assigned when the header was
//! snapshotted (`first_seq - 1` for an empty block, the end marker's
//! sequence once archived). For an unarchived block the data region is
//! authoritative and is rescanned on open; the archived snapshot is what
//! makes reopening a sealed block O(index) instead of O(data).

use crate::error::{Error, Result};
use bytes::BufMut;

/// Magic bytes for block files: "EVHB"
pub const BLOCK_MAGIC: [u8; 4] = [0x45, 0x56, 0x48, 0x42];

/// Version number for the block format
pub const BLOCK_VERSION: u16 = 1;

/// Block header size; also where entry data begins
pub const HEADER_SIZE: usize = 64;

const CRC_OFFSET: usize = HEADER_SIZE - 4;

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub id: u64,
    pub capacity: i64,
    pub data_offset: u32,
    pub first_seq: i64,
    pub last_seq: i64,
    pub archived: bool,
    pub index_offset: i64,
    pub index_length: i32,
}

impl BlockHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_slice(&BLOCK_MAGIC);
        buf.put_u16(BLOCK_VERSION);
        buf.put_u64(self.id);
        buf.put_i64(self.capacity);
        buf.put_u32(self.data_offset);
        buf.put_i64(self.first_seq);
        buf.put_i64(self.last_seq);
        buf.put_u8(self.archived as u8);
        buf.put_i64(self.index_offset);
        buf.put_i32(self.index_length);

        let crc = crc32fast::hash(&out[..CRC_OFFSET]);
        out[CRC_OFFSET..].copy_from_slice(&crc.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidBlock(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        if data[0..4] != BLOCK_MAGIC {
            return Err(Error::InvalidMagic);
        }

        let stored_crc = u32::from_be_bytes([
            data[CRC_OFFSET],
            data[CRC_OFFSET + 1],
            data[CRC_OFFSET + 2],
            data[CRC_OFFSET + 3],
        ]);
        if stored_crc != crc32fast::hash(&data[..CRC_OFFSET]) {
            return Err(Error::CrcMismatch);
        }

        let version = u16::from_be_bytes([data[4], data[5]]);
        if version != BLOCK_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let mut be8 = [0u8; 8];
        be8.copy_from_slice(&data[6..14]);
        let id = u64::from_be_bytes(be8);
        be8.copy_from_slice(&data[14..22]);
        let capacity = i64::from_be_bytes(be8);
        let data_offset = u32::from_be_bytes([data[22], data[23], data[24], data[25]]);
        be8.copy_from_slice(&data[26..34]);
        let first_seq = i64::from_be_bytes(be8);
        be8.copy_from_slice(&data[34..42]);
        let last_seq = i64::from_be_bytes(be8);
        let archived = data[42] != 0;
        be8.copy_from_slice(&data[43..51]);
        let index_offset = i64::from_be_bytes(be8);
        let index_length = i32::from_be_bytes([data[51], data[52], data[53], data[54]]);

        Ok(Self {
            id,
            capacity,
            data_offset,
            first_seq,
            last_seq,
            archived,
            index_offset,
            index_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            id: 7,
            capacity: 64 * 1024 * 1024,
            data_offset: HEADER_SIZE as u32,
            first_seq: 0,
            last_seq: 41,
            archived: true,
            index_offset: 9_000,
            index_length: 512,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let header = sample_header();
        let buf = header.encode();
        let decoded = BlockHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_fresh_block_header_roundtrip() {
        let header = BlockHeader {
            id: 1,
            capacity: 1024,
            data_offset: HEADER_SIZE as u32,
            first_seq: 0,
            last_seq: -1,
            archived: false,
            index_offset: 0,
            index_length: 0,
        };
        let decoded = BlockHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(!decoded.archived);
        assert_eq!(decoded.last_seq, -1);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut buf = sample_header().encode();
        buf[0] = b'X';
        assert!(matches!(
            BlockHeader::decode(&buf).unwrap_err(),
            Error::InvalidMagic
        ));
    }

    #[test]
    fn test_decode_rejects_corrupted_body() {
        let mut buf = sample_header().encode();
        buf[10] ^= 0xFF;
        assert!(matches!(
            BlockHeader::decode(&buf).unwrap_err(),
            Error::CrcMismatch
        ));
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let mut buf = sample_header().encode();
        buf[4..6].copy_from_slice(&99u16.to_be_bytes());
        // Re-seal so the version check is what fires, not the CRC.
        let crc = crc32fast::hash(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            BlockHeader::decode(&buf).unwrap_err(),
            Error::UnsupportedVersion(99)
        ));
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        assert!(BlockHeader::decode(&[0u8; 10]).is_err());
    }
}
