//! Block log records
//!
//! Defines the log header, the frames appended to the block log, and the
//! records those frames carry.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{NativeIoError, Result};

use super::{FRAME_HEADER_SIZE, LOG_HEADER_SIZE, LOG_MAGIC, LOG_VERSION, MAX_FRAME_PAYLOAD};

// =============================================================================
// Log Header
// =============================================================================

/// Fixed header at the start of every block log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Identity of this log incarnation (changes on compaction)
    pub log_id: u64,

    /// Block size every block record in this log was cut with
    pub block_size: u32,
}

impl LogHeader {
    pub fn new(log_id: u64, block_size: u32) -> Self {
        Self { log_id, block_size }
    }

    /// Encode as: magic (4) | version (2) | block_size (4) | log_id (8)
    pub fn encode(&self) -> [u8; LOG_HEADER_SIZE as usize] {
        let mut buf = [0u8; LOG_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(LOG_MAGIC);
        buf[4..6].copy_from_slice(&LOG_VERSION.to_le_bytes());
        buf[6..10].copy_from_slice(&self.block_size.to_le_bytes());
        buf[10..18].copy_from_slice(&self.log_id.to_le_bytes());
        buf
    }

    /// Decode a header. A header that is not ours is an unreadable log,
    /// which surfaces as a hard I/O failure.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LOG_HEADER_SIZE as usize {
            return Err(unreadable(format!(
                "block log header truncated: {} bytes",
                bytes.len()
            )));
        }

        let mut cursor = &bytes[..LOG_HEADER_SIZE as usize];
        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if &magic != LOG_MAGIC {
            return Err(unreadable(format!(
                "invalid block log magic: expected NIOL, got {:?}",
                magic
            )));
        }

        let version = cursor.get_u16_le();
        if version != LOG_VERSION {
            return Err(unreadable(format!(
                "unsupported block log version: {}",
                version
            )));
        }

        let block_size = cursor.get_u32_le();
        let log_id = cursor.get_u64_le();
        if block_size == 0 {
            return Err(unreadable("block log header has zero block size".to_string()));
        }

        Ok(Self { log_id, block_size })
    }
}

fn unreadable(message: String) -> NativeIoError {
    NativeIoError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, message))
}

// =============================================================================
// Records
// =============================================================================

/// One block of one write. Every block of a write shares `seq` and `parts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub file_id: u64,

    /// Sequence number of the write this block belongs to
    pub seq: u64,

    /// Position of this block within its write (0-based)
    pub part: u32,

    /// Number of blocks in the write
    pub parts: u32,

    /// Index of the block within the file (byte offset / block size)
    pub block_index: u64,

    /// Logical file length once the write commits
    pub file_len: u64,

    /// CRC32 of `data`
    pub checksum: u32,

    /// Block contents, from the block's first byte up to its valid end
    pub data: Vec<u8>,
}

impl BlockRecord {
    pub fn new(
        file_id: u64,
        seq: u64,
        part: u32,
        parts: u32,
        block_index: u64,
        file_len: u64,
        data: Vec<u8>,
    ) -> Self {
        let checksum = crc32fast::hash(&data);
        Self {
            file_id,
            seq,
            part,
            parts,
            block_index,
            file_len,
            checksum,
            data,
        }
    }

    /// Check the block checksum against its contents
    pub fn verify(&self) -> bool {
        crc32fast::hash(&self.data) == self.checksum
    }
}

/// Records that can be appended to the block log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A file came into existence under `name`
    Create { file_id: u64, name: String },

    /// One block of a write
    Block(BlockRecord),

    /// Explicit resize (truncate or zero-extend)
    SetLength { file_id: u64, seq: u64, length: u64 },

    /// The file and all of its blocks are gone
    Delete { file_id: u64 },
}

// =============================================================================
// Frames
// =============================================================================

/// Location of a frame inside the block log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePointer {
    /// Byte offset of the frame header
    pub offset: u64,

    /// Total frame size (header + payload)
    pub len: u32,

    /// Log sequence number stamped on the frame
    pub lsn: u64,
}

impl FramePointer {
    /// Offset of the first byte after this frame
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// Parsed frame header: LSN (8) | CRC (4) | Len (4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub lsn: u64,
    pub crc: u32,
    pub len: u32,
}

impl FrameHeader {
    /// Parse a header; `None` if fewer than FRAME_HEADER_SIZE bytes are given
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let mut cursor = &bytes[..FRAME_HEADER_SIZE];
        Some(Self {
            lsn: cursor.get_u64_le(),
            crc: cursor.get_u32_le(),
            len: cursor.get_u32_le(),
        })
    }

    /// Total size of the frame this header introduces
    pub fn frame_len(&self) -> u64 {
        FRAME_HEADER_SIZE as u64 + self.len as u64
    }

    /// Whether the length field is within what a writer could produce
    pub fn is_plausible(&self) -> bool {
        self.len <= MAX_FRAME_PAYLOAD
    }

    /// Check the payload against the stored CRC
    pub fn verify(&self, payload: &[u8]) -> bool {
        payload.len() == self.len as usize && frame_crc(self.lsn, self.len, payload) == self.crc
    }
}

/// A single log frame: LSN plus one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub lsn: u64,
    pub record: LogRecord,
}

impl Frame {
    pub fn new(lsn: u64, record: LogRecord) -> Self {
        Self { lsn, record }
    }

    /// Encode as: LSN (8) | CRC (4) | Len (4) | bincode(record)
    pub fn encode(&self) -> Result<Bytes> {
        let payload = bincode::serialize(&self.record)?;
        if payload.len() > MAX_FRAME_PAYLOAD as usize {
            return Err(NativeIoError::InvalidArgument(format!(
                "record of {} bytes exceeds frame limit of {} bytes",
                payload.len(),
                MAX_FRAME_PAYLOAD
            )));
        }

        let len = payload.len() as u32;
        let crc = frame_crc(self.lsn, len, &payload);

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_u64_le(self.lsn);
        buf.put_u32_le(crc);
        buf.put_u32_le(len);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode one complete frame, verifying its CRC
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::parse(bytes).ok_or_else(|| {
            NativeIoError::Corruption(format!("incomplete frame header: {} bytes", bytes.len()))
        })?;

        let end = header.frame_len() as usize;
        if !header.is_plausible() || bytes.len() < end {
            return Err(NativeIoError::Corruption(format!(
                "incomplete frame: expected {} bytes, got {}",
                end,
                bytes.len()
            )));
        }

        let payload = &bytes[FRAME_HEADER_SIZE..end];
        if !header.verify(payload) {
            return Err(NativeIoError::Corruption(format!(
                "frame CRC mismatch at lsn {}",
                header.lsn
            )));
        }

        let record = bincode::deserialize(payload).map_err(|e| {
            NativeIoError::Corruption(format!("undecodable record at lsn {}: {}", header.lsn, e))
        })?;

        Ok(Self {
            lsn: header.lsn,
            record,
        })
    }
}

/// CRC32 over LSN, length and payload
fn frame_crc(lsn: u64, len: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
