//! Block Log Writer
//!
//! Appends batches of frames to the block log.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;

use crate::config::SyncStrategy;
use crate::error::{NativeIoError, Result};

use super::record::{Frame, FramePointer, LogHeader, LogRecord};
use super::LOG_HEADER_SIZE;

/// Appends frames to the block log
///
/// A batch is written with a single `write_all`. If the write or the sync
/// that follows fails, the file is cut back to where the batch started so a
/// failed call leaves nothing behind.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    header: LogHeader,
    /// Offset where the next frame will be written
    position: u64,
    next_lsn: u64,
    sync_strategy: SyncStrategy,
    /// Batches written since the last fsync
    unsynced: usize,
}

impl LogWriter {
    /// Create a fresh log at `path`, replacing whatever is there
    pub fn create(path: &Path, header: LogHeader, sync_strategy: SyncStrategy) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        file.write_all(&header.encode())?;
        file.sync_all()?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            position: LOG_HEADER_SIZE,
            next_lsn: 1,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Reopen an existing log for appending after recovery
    ///
    /// Anything beyond `end` is a torn tail and is cut off.
    pub fn resume(
        path: &Path,
        header: LogHeader,
        end: u64,
        next_lsn: u64,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();

        if end < LOG_HEADER_SIZE || end > len {
            return Err(NativeIoError::Corruption(format!(
                "recovered log end {} is outside the log ({} bytes)",
                end, len
            )));
        }

        if len > end {
            tracing::warn!(
                "Cutting {} torn bytes from the tail of {}",
                len - end,
                path.display()
            );
            file.set_len(end)?;
            file.sync_all()?;
        }

        file.seek(SeekFrom::Start(end))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            position: end,
            next_lsn,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append records as one contiguous batch
    ///
    /// Returns one pointer per record, in order. `force_sync` makes the
    /// batch durable regardless of the sync strategy.
    pub fn append(&mut self, records: Vec<LogRecord>, force_sync: bool) -> Result<Vec<FramePointer>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let start = self.position;
        let mut offset = start;
        let mut lsn = self.next_lsn;
        let mut batch = BytesMut::new();
        let mut pointers = Vec::with_capacity(records.len());

        for record in records {
            let bytes = Frame::new(lsn, record).encode()?;
            pointers.push(FramePointer {
                offset,
                len: bytes.len() as u32,
                lsn,
            });
            offset += bytes.len() as u64;
            lsn += 1;
            batch.extend_from_slice(&bytes);
        }

        if let Err(e) = self.file.write_all(&batch) {
            self.rollback(start);
            return Err(e.into());
        }
        self.unsynced += 1;

        if force_sync || self.should_sync() {
            if let Err(e) = self.sync() {
                self.rollback(start);
                return Err(e);
            }
        }

        self.position = offset;
        self.next_lsn = lsn;
        Ok(pointers)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }

    fn should_sync(&self) -> bool {
        match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        }
    }

    /// Cut the file back to `start` after a failed batch
    fn rollback(&mut self, start: u64) {
        let restored = self
            .file
            .set_len(start)
            .and_then(|_| self.file.seek(SeekFrom::Start(start)).map(|_| ()));
        if let Err(e) = restored {
            tracing::error!(
                "Failed to roll back partial batch in {}: {}",
                self.path.display(),
                e
            );
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn header(&self) -> LogHeader {
        self.header
    }

    /// Offset where the next frame will be written
    pub fn position(&self) -> u64 {
        self.position
    }

    /// LSN the next frame will carry
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Batches not yet fsynced
    pub fn unsynced(&self) -> usize {
        self.unsynced
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
