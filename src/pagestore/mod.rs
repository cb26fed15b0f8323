//! Durable Page Store Module
//!
//! Persists file contents as fixed-size blocks in an append-only block log.
//!
//! ## Responsibilities
//! - Cut writes into block records tagged with the file's sequence number
//! - Append each write as one contiguous, all-or-nothing batch
//! - Serve byte-range reads from the current block versions
//! - Track live vs dead log bytes for compaction
//! - Recover the catalog from the log on startup
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                           │
//! │   Magic: "NIOL" (4) | Version (2) | BlockSize (4) | Id (8)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Frame 1                                                     │
//! │ ┌─────────┬─────────┬────────┬──────────────────────────┐   │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ bincode(LogRecord)       │   │
//! │ └─────────┴─────────┴────────┴──────────────────────────┘   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Frame 2 ...                                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A write of N blocks is N `Block` frames sharing one sequence number and
//! `parts = N`. It is committed only if all N frames are present and intact.

mod reader;
mod record;
pub mod recovery;
mod writer;

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};

use crate::catalog::{BlockRef, FileEntry};
use crate::error::{NativeIoError, Result};

pub use reader::{read_frame_at, LogReader, ScanItem};
pub use record::{BlockRecord, Frame, FrameHeader, FramePointer, LogHeader, LogRecord};
pub use recovery::{RecoveredState, RecoveryPhase, RecoveryReport, RecoveryScanner};
pub use writer::LogWriter;

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic bytes identifying a NativeIO block log
pub(crate) const LOG_MAGIC: &[u8; 4] = b"NIOL";

/// Current block log format version
pub(crate) const LOG_VERSION: u16 = 1;

/// Log header: Magic (4) + Version (2) + BlockSize (4) + LogId (8) = 18 bytes
pub const LOG_HEADER_SIZE: u64 = 18;

/// Frame header: LSN (8) + CRC (4) + Len (4) = 16 bytes
pub const FRAME_HEADER_SIZE: usize = 16;

/// Largest record payload a frame may carry (2 MB)
pub const MAX_FRAME_PAYLOAD: u32 = 2 * 1024 * 1024;

/// Largest logical file length (fits the signed length returned to callers)
pub const MAX_FILE_SIZE: u64 = i64::MAX as u64;

// =============================================================================
// Staged Writes
// =============================================================================

/// A write cut into block records, not yet appended
#[derive(Debug)]
pub struct StagedWrite {
    file_id: u64,
    seq: u64,
    new_length: u64,
    records: Vec<LogRecord>,
}

impl StagedWrite {
    /// Sequence number the write will commit as
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// File length once the write commits
    pub fn new_length(&self) -> u64 {
        self.new_length
    }

    /// Number of block records in the write
    pub fn block_count(&self) -> usize {
        self.records.len()
    }
}

// =============================================================================
// Page Store
// =============================================================================

/// Block-level access to the block log
///
/// ## Concurrency:
/// - `writer`: Mutex, one batch appended at a time
/// - `reader`: RwLock around a read-only handle; positioned reads share it,
///   compaction swaps it exclusively
/// - Callers hold the per-file lock of the file they touch, so a file's
///   blocks never change underneath a read of that file
pub struct PageStore {
    block_size: u64,
    writer: Mutex<LogWriter>,
    reader: RwLock<File>,
    /// Log bytes referenced by some file's current blocks
    live_bytes: AtomicU64,
}

impl PageStore {
    /// Wrap a writer positioned at the end of a recovered log
    pub fn new(writer: LogWriter, live_bytes: u64) -> Result<Self> {
        let reader = File::open(writer.path())?;
        Ok(Self {
            block_size: writer.header().block_size as u64,
            writer: Mutex::new(writer),
            reader: RwLock::new(reader),
            live_bytes: AtomicU64::new(live_bytes),
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    // =========================================================================
    // Log Access
    // =========================================================================

    /// Append records as one batch
    pub fn append(&self, records: Vec<LogRecord>, force_sync: bool) -> Result<Vec<FramePointer>> {
        self.writer.lock().append(records, force_sync)
    }

    /// Make everything appended so far durable
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()
    }

    /// Sync, then report (log id, end offset, next LSN) as one consistent cut
    pub fn cursor(&self) -> Result<(u64, u64, u64)> {
        let mut writer = self.writer.lock();
        writer.sync()?;
        Ok((writer.header().log_id, writer.position(), writer.next_lsn()))
    }

    /// Read one block version, verifying frame CRC and block checksum
    pub fn read_block(&self, file_id: u64, block_index: u64, block: &BlockRef) -> Result<Vec<u8>> {
        let frame = {
            let file = self.reader.read();
            read_frame_at(&file, &block.frame)?
        };

        match frame.record {
            LogRecord::Block(record)
                if record.file_id == file_id && record.block_index == block_index =>
            {
                if !record.verify() {
                    return Err(NativeIoError::Corruption(format!(
                        "checksum mismatch in block {} of file {}",
                        block_index, file_id
                    )));
                }
                if record.data.len() < block.len as usize {
                    return Err(NativeIoError::Corruption(format!(
                        "block {} of file {} holds {} bytes, expected {}",
                        block_index,
                        file_id,
                        record.data.len(),
                        block.len
                    )));
                }
                let mut data = record.data;
                data.truncate(block.len as usize);
                Ok(data)
            }
            _ => Err(NativeIoError::Corruption(format!(
                "frame at offset {} does not hold block {} of file {}",
                block.frame.offset, block_index, file_id
            ))),
        }
    }

    /// Read one block, treating a damaged block as absent
    ///
    /// Only `Corruption` is absorbed; I/O failures still propagate.
    fn read_block_or_absent(
        &self,
        file_id: u64,
        block_index: u64,
        block: &BlockRef,
    ) -> Result<Option<Vec<u8>>> {
        match self.read_block(file_id, block_index, block) {
            Ok(data) => Ok(Some(data)),
            Err(NativeIoError::Corruption(reason)) => {
                tracing::warn!(
                    "Block {} of file {} is damaged, reading it as zeros: {}",
                    block_index,
                    file_id,
                    reason
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // File-Level Operations (caller holds the file lock)
    // =========================================================================

    /// Read up to `length` bytes at `offset`
    ///
    /// Reads past the end return nothing; reads straddling the end return
    /// the in-range part. Unbacked and damaged blocks read as zero.
    pub fn read_range(&self, entry: &FileEntry, offset: u64, length: usize) -> Result<Bytes> {
        if length == 0 || offset >= entry.length {
            return Ok(Bytes::new());
        }

        let end = entry.length.min(offset.saturating_add(length as u64));
        let mut out = BytesMut::zeroed((end - offset) as usize);
        let bs = self.block_size;

        for (&block_index, block) in entry.blocks.range(offset / bs..=(end - 1) / bs) {
            let block_start = block_index * bs;
            let from = offset.max(block_start);
            let to = end.min(block_start + block.len as u64);
            if from >= to {
                continue;
            }

            let Some(data) = self.read_block_or_absent(entry.id, block_index, block)? else {
                continue;
            };
            out[(from - offset) as usize..(to - offset) as usize]
                .copy_from_slice(&data[(from - block_start) as usize..(to - block_start) as usize]);
        }

        Ok(out.freeze())
    }

    /// Cut `data` at `offset` into block records for the file's next sequence
    ///
    /// Blocks only partly covered by the write are merged with their current
    /// contents; a damaged block contributes zeros. `data` must be non-empty.
    pub fn stage_write(&self, entry: &FileEntry, data: &[u8], offset: u64) -> Result<StagedWrite> {
        let end = write_end(offset, data.len())?;
        if data.is_empty() {
            return Err(NativeIoError::InvalidArgument(
                "cannot stage an empty write".to_string(),
            ));
        }

        let bs = self.block_size;
        let new_length = entry.length.max(end);
        let seq = entry.next_seq;
        let first = offset / bs;
        let last = (end - 1) / bs;
        let parts = u32::try_from(last - first + 1).map_err(|_| {
            NativeIoError::InvalidArgument(format!("write of {} bytes is too large", data.len()))
        })?;

        let mut records = Vec::with_capacity(parts as usize);
        for (part, block_index) in (first..=last).enumerate() {
            let block_start = block_index * bs;
            let block_len = (new_length - block_start).min(bs) as usize;
            let copy_start = offset.max(block_start);
            let copy_end = end.min(block_start + bs);

            let mut block = vec![0u8; block_len];
            let fully_covered =
                copy_start == block_start && copy_end >= block_start + block_len as u64;
            if !fully_covered {
                let prior = match entry.blocks.get(&block_index) {
                    Some(current) => self.read_block_or_absent(entry.id, block_index, current)?,
                    None => None,
                };
                if let Some(prior) = prior {
                    let keep = prior.len().min(block_len);
                    block[..keep].copy_from_slice(&prior[..keep]);
                }
            }

            block[(copy_start - block_start) as usize..(copy_end - block_start) as usize]
                .copy_from_slice(&data[(copy_start - offset) as usize..(copy_end - offset) as usize]);

            records.push(LogRecord::Block(BlockRecord::new(
                entry.id,
                seq,
                part as u32,
                parts,
                block_index,
                new_length,
                block,
            )));
        }

        Ok(StagedWrite {
            file_id: entry.id,
            seq,
            new_length,
            records,
        })
    }

    /// Append a staged write and install its blocks in `entry`
    ///
    /// If the append fails the entry keeps its contents and length; only
    /// its sequence number moves on, in case part of the batch reached disk.
    pub fn commit_write(&self, entry: &mut FileEntry, staged: StagedWrite) -> Result<()> {
        if staged.file_id != entry.id {
            return Err(NativeIoError::InvalidArgument(format!(
                "write staged for file {} committed against file {}",
                staged.file_id, entry.id
            )));
        }

        let StagedWrite {
            seq,
            new_length,
            records,
            ..
        } = staged;
        let blocks: Vec<(u64, u32)> = records
            .iter()
            .filter_map(|record| match record {
                LogRecord::Block(block) => Some((block.block_index, block.data.len() as u32)),
                _ => None,
            })
            .collect();

        let pointers = match self.append(records, false) {
            Ok(pointers) => pointers,
            Err(e) => {
                entry.observe_seq(seq);
                return Err(e);
            }
        };

        let mut retained = 0u64;
        let mut released = 0u64;
        for ((block_index, len), frame) in blocks.into_iter().zip(pointers) {
            retained += frame.len as u64;
            let replaced = entry.apply_block(seq, block_index, new_length, BlockRef { frame, len });
            if let Some(old) = replaced {
                released += old.frame.len as u64;
            }
        }
        self.retain(retained);
        self.release(released);
        Ok(())
    }

    /// Append a resize of `entry` to `length` and apply it
    pub fn commit_length(&self, entry: &mut FileEntry, length: u64) -> Result<()> {
        if length > MAX_FILE_SIZE {
            return Err(NativeIoError::InvalidArgument(format!(
                "length {} exceeds maximum file size",
                length
            )));
        }

        let seq = entry.next_seq;
        let record = LogRecord::SetLength {
            file_id: entry.id,
            seq,
            length,
        };
        if let Err(e) = self.append(vec![record], false) {
            entry.observe_seq(seq);
            return Err(e);
        }

        let dropped = entry.apply_length(seq, length, self.block_size);
        self.release(dropped.iter().map(|b| b.frame.len as u64).sum());
        Ok(())
    }

    // =========================================================================
    // Space Accounting
    // =========================================================================

    /// Current log size in bytes
    pub fn log_size(&self) -> u64 {
        self.writer.lock().position()
    }

    /// Log bytes still referenced by some file
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::SeqCst)
    }

    /// Log bytes compaction would reclaim
    pub fn dead_bytes(&self) -> u64 {
        self.log_size()
            .saturating_sub(LOG_HEADER_SIZE)
            .saturating_sub(self.live_bytes())
    }

    pub(crate) fn retain(&self, bytes: u64) {
        self.live_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn release(&self, bytes: u64) {
        let _ = self
            .live_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(bytes))
            });
    }

    /// Swap in a freshly compacted log
    ///
    /// Caller holds every file lock, so no read or write is in flight.
    pub(crate) fn replace(&self, writer: LogWriter, live_bytes: u64) -> Result<()> {
        let reader = File::open(writer.path())?;
        let mut current_writer = self.writer.lock();
        let mut current_reader = self.reader.write();
        *current_writer = writer;
        *current_reader = reader;
        self.live_bytes.store(live_bytes, Ordering::SeqCst);
        Ok(())
    }
}

/// End offset of a write, rejecting ranges past the maximum file size
pub fn write_end(offset: u64, len: usize) -> Result<u64> {
    offset
        .checked_add(len as u64)
        .filter(|end| *end <= MAX_FILE_SIZE)
        .ok_or_else(|| {
            NativeIoError::InvalidArgument(format!(
                "range of {} bytes at offset {} exceeds maximum file size",
                len, offset
            ))
        })
}

/// fsync a directory so renames inside it are durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
