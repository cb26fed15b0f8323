//! Namespace Module
//!
//! The storage engine behind one namespace directory.
//!
//! ## Responsibilities
//! - Run recovery before anything else can touch the namespace
//! - Route descriptor calls through the handle registry to the page store
//! - Charge and release quota in step with each commit
//! - Checkpoint the catalog and compact the block log

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::{Mutex, RwLockWriteGuard};

use crate::catalog::{BlockRef, Catalog, CatalogCheckpoint, FileEntry};
use crate::config::Config;
use crate::error::{NativeIoError, Result};
use crate::pagestore::{
    sync_dir, write_end, BlockRecord, LogHeader, LogRecord, LogWriter, PageStore,
    RecoveryReport, RecoveryScanner, LOG_HEADER_SIZE, MAX_FILE_SIZE,
};
use crate::primitive::{Outcome, PrimitiveCall};
use crate::quota::{QuotaTracker, QuotaUsage};
use crate::registry::{Descriptor, HandleRegistry};

/// Inspection view of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: u64,
    pub name: String,
    pub length: u64,
    /// Sequence number of the last committed change
    pub seq: u64,
    pub open_handles: usize,
    /// Byte ranges backed by stored blocks
    pub allocated: Vec<Range<u64>>,
}

/// A namespace of named files sharing one quota
///
/// ## Concurrency Model: per-file locking
///
/// - **Name operations** (open/delete/enumerate): catalog map lock
///   - open holds an upgradable read, upgraded only to create
///   - delete holds the write lock, so no open can attach mid-delete
///
/// - **Data operations** (read/write/set_length): per-file `RwLock`
///   - reads share the file lock, writes and resizes hold it exclusively
///   - different files proceed in parallel and only meet at the log append
///
/// - **Maintenance** (checkpoint/compact): `maintenance` mutex, then the
///   catalog and file locks in the usual order
pub struct Namespace {
    config: Config,
    log_path: PathBuf,
    checkpoint_path: PathBuf,
    catalog: Catalog,
    registry: HandleRegistry,
    quota: QuotaTracker,
    store: PageStore,
    next_file_id: AtomicU64,
    /// Frames appended since the last checkpoint
    frames_since_checkpoint: AtomicU64,
    maintenance: Mutex<()>,
    recovery: RecoveryReport,
}

impl Namespace {
    // =========================================================================
    // Path Constants
    // =========================================================================
    /// Block log file name inside the data directory
    pub const LOG_FILENAME: &'static str = "blocks.log";
    const CHECKPOINT_FILENAME: &'static str = "catalog.ckpt";
    const COMPACT_FILENAME: &'static str = "blocks.log.compact";

    /// Open or create the namespace described by `config`
    ///
    /// On startup:
    /// 1. Create the data directory and clear leftovers of an interrupted compaction
    /// 2. Load the catalog checkpoint, if one can be trusted
    /// 3. Recover the catalog from the block log
    /// 4. Recompute quota consumption from the recovered files
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Directory and leftovers
        fs::create_dir_all(&config.data_dir)?;
        let log_path = config.data_dir.join(Self::LOG_FILENAME);
        let checkpoint_path = config.data_dir.join(Self::CHECKPOINT_FILENAME);
        let compact_path = config.data_dir.join(Self::COMPACT_FILENAME);

        if compact_path.exists() {
            tracing::warn!(
                "Removing unfinished compaction output {}",
                compact_path.display()
            );
            fs::remove_file(&compact_path)?;
        }

        // Step 2: Checkpoint (never required)
        let checkpoint = match CatalogCheckpoint::load(&checkpoint_path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!("Ignoring unusable checkpoint: {}", e);
                None
            }
        };

        // Step 3: Block log
        let fresh = match fs::metadata(&log_path) {
            Ok(meta) => meta.len() < LOG_HEADER_SIZE,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if fresh {
            let header = LogHeader::new(new_log_id(0), config.block_size as u32);
            LogWriter::create(&log_path, header, config.sync_strategy)?;
            tracing::info!(
                "Created block log {} (block size {})",
                log_path.display(),
                config.block_size
            );
        }

        let (state, recovery) = RecoveryScanner::new(&log_path, checkpoint).run()?;
        let header = state
            .header
            .ok_or_else(|| NativeIoError::Corruption("recovery produced no log header".into()))?;
        if header.block_size as usize != config.block_size {
            tracing::warn!(
                "Block log uses block size {}, ignoring configured {}",
                header.block_size,
                config.block_size
            );
        }

        let writer = LogWriter::resume(
            &log_path,
            header,
            state.end_offset,
            state.next_lsn,
            config.sync_strategy,
        )?;
        let store = PageStore::new(writer, state.live_bytes)?;

        // Step 4: Quota from committed state
        let catalog = Catalog::from_entries(state.files, config.max_name_len);
        let consumed = catalog.consumed(config.entry_footprint);
        if consumed > config.capacity {
            tracing::warn!(
                "Recovered files consume {} bytes, over the {} byte capacity",
                consumed,
                config.capacity
            );
        }

        tracing::info!(
            "Recovered {} file(s): {} frames scanned, {} corrupted, {} writes committed, {} discarded, last_lsn={}, truncated={}, from_checkpoint={}",
            recovery.files_recovered,
            recovery.frames_scanned,
            recovery.frames_corrupted,
            recovery.writes_committed,
            recovery.writes_discarded,
            recovery.last_lsn,
            recovery.was_truncated,
            recovery.from_checkpoint
        );

        Ok(Self {
            catalog,
            registry: HandleRegistry::new(config.max_open_handles),
            quota: QuotaTracker::new(config.capacity, consumed),
            store,
            next_file_id: AtomicU64::new(state.next_file_id),
            frames_since_checkpoint: AtomicU64::new(0),
            maintenance: Mutex::new(()),
            recovery,
            log_path,
            checkpoint_path,
            config,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Execute one primitive call
    ///
    /// Routes calls to the matching operation
    pub fn execute(&self, call: PrimitiveCall) -> Result<Outcome> {
        match call {
            PrimitiveCall::Open { name } => self.open_file(&name).map(Outcome::Descriptor),
            PrimitiveCall::Close { fd } => {
                self.close(Descriptor::from_raw(fd)?)?;
                Ok(Outcome::Status)
            }
            PrimitiveCall::Delete { name } => {
                self.delete(&name)?;
                Ok(Outcome::Status)
            }
            PrimitiveCall::GetAll => Ok(Outcome::Names(self.get_all())),
            PrimitiveCall::Read { fd, length, offset } => self
                .read(Descriptor::from_raw(fd)?, length, offset)
                .map(Outcome::Bytes),
            PrimitiveCall::Write { fd, data, offset } => self
                .write(Descriptor::from_raw(fd)?, &data, offset)
                .map(Outcome::Count),
            PrimitiveCall::SetLength { fd, length } => {
                self.set_length(Descriptor::from_raw(fd)?, length)?;
                Ok(Outcome::Status)
            }
            PrimitiveCall::GetLength { fd } => self
                .get_length(Descriptor::from_raw(fd)?)
                .map(Outcome::Length),
            PrimitiveCall::Flush { fd } => {
                self.flush(Descriptor::from_raw(fd)?)?;
                Ok(Outcome::Status)
            }
        }
    }

    // =========================================================================
    // Name Operations
    // =========================================================================

    /// Open `name`, creating an empty file if it does not exist
    ///
    /// Creating charges the per-file footprint against the quota.
    pub fn open_file(&self, name: &str) -> Result<Descriptor> {
        self.catalog.validate_name(name)?;

        let (fd, created) = self.catalog.open_or_create(
            name,
            || self.create_entry(name),
            |node| self.registry.issue(Arc::clone(node)),
        )?;

        tracing::debug!("Opened {:?} as descriptor {} (created={})", name, fd, created);
        if created {
            self.maybe_maintain();
        }
        Ok(fd)
    }

    /// Durably create a new entry (catalog write lock held)
    fn create_entry(&self, name: &str) -> Result<FileEntry> {
        let reservation = self.quota.try_reserve(self.config.entry_footprint)?;
        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);

        self.store.append(
            vec![LogRecord::Create {
                file_id,
                name: name.to_string(),
            }],
            true,
        )?;

        reservation.commit();
        self.note_frames(1);
        Ok(FileEntry::new(file_id, name))
    }

    /// Close a descriptor
    ///
    /// Makes everything written through the namespace durable, then
    /// invalidates the descriptor.
    pub fn close(&self, fd: Descriptor) -> Result<()> {
        self.registry.resolve(fd)?;
        self.store.sync()?;
        let node = self.registry.release(fd)?;
        tracing::debug!(
            "Closed descriptor {} ({} still open on file {})",
            fd,
            node.open_handles(),
            node.read().id
        );
        Ok(())
    }

    /// Delete `name`
    ///
    /// Fails with `Busy` while any descriptor is open on it.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.catalog.validate_name(name)?;

        self.catalog.remove(name, |entry| {
            self.store
                .append(vec![LogRecord::Delete { file_id: entry.id }], true)?;
            self.quota
                .release(entry.consumed(self.config.entry_footprint));
            self.store.release(entry.live_frame_bytes());
            Ok(())
        })?;

        self.note_frames(1);
        tracing::debug!("Deleted {:?}", name);
        self.maybe_maintain();
        Ok(())
    }

    /// Snapshot of all file names, in name order
    pub fn get_all(&self) -> Vec<String> {
        self.catalog.names()
    }

    /// Inspect a file by name
    pub fn stat(&self, name: &str) -> Result<FileInfo> {
        let node = self
            .catalog
            .lookup(name)
            .ok_or_else(|| NativeIoError::NotFound(format!("file {:?}", name)))?;
        let entry = node.read();
        Ok(FileInfo {
            id: entry.id,
            name: entry.name.clone(),
            length: entry.length,
            seq: entry.seq,
            open_handles: node.open_handles(),
            allocated: entry.allocation_map(self.store.block_size()),
        })
    }

    // =========================================================================
    // Descriptor Operations
    // =========================================================================

    /// Read up to `length` bytes at `offset`
    ///
    /// Short reads at end of file are success; reads past it return nothing.
    pub fn read(&self, fd: Descriptor, length: usize, offset: u64) -> Result<Bytes> {
        check_offset(offset)?;
        let node = self.registry.resolve(fd)?;
        let entry = node.read();
        self.store.read_range(&entry, offset, length)
    }

    /// Write `data` at `offset`, all or nothing
    ///
    /// Steps:
    /// 1. Lock the file exclusively
    /// 2. Reserve quota for any growth
    /// 3. Stage and append the blocks as one write group
    /// 4. Keep the reservation once the group is in the log
    pub fn write(&self, fd: Descriptor, data: &[u8], offset: u64) -> Result<usize> {
        let end = write_end(offset, data.len())?;
        let node = self.registry.resolve(fd)?;
        if data.is_empty() {
            return Ok(0);
        }

        {
            let mut entry = node.write();
            let reservation = self.quota.try_reserve(end.saturating_sub(entry.length))?;
            let staged = self.store.stage_write(&entry, data, offset)?;
            let frames = staged.block_count() as u64;
            self.store.commit_write(&mut entry, staged)?;
            reservation.commit();
            self.note_frames(frames);
        }

        self.maybe_maintain();
        Ok(data.len())
    }

    /// Truncate or zero-extend the file to `length`
    pub fn set_length(&self, fd: Descriptor, length: u64) -> Result<()> {
        if length > MAX_FILE_SIZE {
            return Err(NativeIoError::InvalidArgument(format!(
                "length {} exceeds maximum file size",
                length
            )));
        }
        let node = self.registry.resolve(fd)?;

        {
            let mut entry = node.write();
            let current = entry.length;
            if length == current {
                return Ok(());
            }

            if length > current {
                let reservation = self.quota.try_reserve(length - current)?;
                self.store.commit_length(&mut entry, length)?;
                reservation.commit();
            } else {
                self.store.commit_length(&mut entry, length)?;
                self.quota.release(current - length);
            }
            self.note_frames(1);
        }

        self.maybe_maintain();
        Ok(())
    }

    /// Logical length of the file
    pub fn get_length(&self, fd: Descriptor) -> Result<u64> {
        let node = self.registry.resolve(fd)?;
        let length = node.read().length;
        Ok(length)
    }

    /// Force everything written so far to durable storage
    pub fn flush(&self, fd: Descriptor) -> Result<()> {
        self.registry.resolve(fd)?;
        self.store.sync()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Write a catalog checkpoint
    pub fn checkpoint(&self) -> Result<()> {
        let _guard = self.maintenance.lock();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> Result<()> {
        let checkpoint = {
            let files = self.catalog.read_map();
            let entries: Vec<_> = files.values().map(|node| node.read()).collect();
            let (log_id, covered_offset, next_lsn) = self.store.cursor()?;
            CatalogCheckpoint {
                log_id,
                covered_offset,
                next_lsn,
                next_file_id: self.next_file_id.load(Ordering::SeqCst),
                files: entries.iter().map(|entry| (**entry).clone()).collect(),
            }
        };

        checkpoint.write(&self.checkpoint_path)?;
        self.frames_since_checkpoint.store(0, Ordering::SeqCst);
        tracing::info!(
            "Checkpointed {} file(s) at offset {}",
            checkpoint.files.len(),
            checkpoint.covered_offset
        );
        Ok(())
    }

    /// Rewrite the block log keeping only live blocks
    ///
    /// Steps:
    /// 1. Lock the catalog and every file
    /// 2. Copy each file's current blocks into a fresh log
    /// 3. Sync and rename it over the old log
    /// 4. Point every file at its new blocks and checkpoint
    pub fn compact(&self) -> Result<()> {
        let _guard = self.maintenance.lock();
        self.compact_locked()
    }

    fn compact_locked(&self) -> Result<()> {
        // Step 1: Quiesce
        let files = self.catalog.write_map();
        let mut entries: Vec<RwLockWriteGuard<'_, FileEntry>> =
            files.values().map(|node| node.write()).collect();

        let (old_log_id, _, _) = self.store.cursor()?;
        let size_before = self.store.log_size();
        let compact_path = self.config.data_dir.join(Self::COMPACT_FILENAME);
        let header = LogHeader::new(new_log_id(old_log_id), self.store.block_size() as u32);

        // Step 2: Copy live blocks
        let copied = self.copy_live(&compact_path, header, &entries);
        let (writer, compacted, live_bytes) = match copied {
            Ok(copied) => copied,
            Err(e) => {
                let _ = fs::remove_file(&compact_path);
                return Err(e);
            }
        };

        // Step 3: Swap the logs
        let (position, next_lsn) = (writer.position(), writer.next_lsn());
        drop(writer);
        fs::rename(&compact_path, &self.log_path)?;
        sync_dir(&self.config.data_dir)?;

        let writer = LogWriter::resume(
            &self.log_path,
            header,
            position,
            next_lsn,
            self.config.sync_strategy,
        )?;
        self.store.replace(writer, live_bytes)?;

        // Step 4: Repoint and checkpoint
        for (entry, file) in entries.iter_mut().zip(compacted) {
            entry.blocks = file.blocks;
            entry.seq = file.seq;
            entry.observe_seq(file.seq);
        }

        let checkpoint = CatalogCheckpoint {
            log_id: header.log_id,
            covered_offset: position,
            next_lsn,
            next_file_id: self.next_file_id.load(Ordering::SeqCst),
            files: entries.iter().map(|entry| (**entry).clone()).collect(),
        };
        drop(entries);
        drop(files);

        match checkpoint.write(&self.checkpoint_path) {
            Ok(()) => self.frames_since_checkpoint.store(0, Ordering::SeqCst),
            Err(e) => tracing::warn!("Checkpoint after compaction failed: {}", e),
        }

        tracing::info!(
            "Compacted block log: {} -> {} bytes ({} live)",
            size_before,
            position,
            live_bytes
        );
        Ok(())
    }

    /// Write every file's current state into a fresh log at `path`
    ///
    /// Each file becomes a `Create` frame plus its blocks, copied in write
    /// groups of at most `compaction_batch_bytes` of data. The first group
    /// keeps the file's sequence number; later ones take fresh numbers so
    /// recovery applies them in order. A file with no readable blocks gets
    /// a resize instead.
    fn copy_live(
        &self,
        path: &Path,
        header: LogHeader,
        entries: &[RwLockWriteGuard<'_, FileEntry>],
    ) -> Result<(LogWriter, Vec<CompactedFile>, u64)> {
        let mut writer = LogWriter::create(path, header, self.config.sync_strategy)?;
        let batch_blocks =
            (self.config.compaction_batch_bytes as u64 / header.block_size as u64).max(1) as usize;
        let mut compacted = Vec::with_capacity(entries.len());
        let mut live_bytes = 0u64;

        for entry in entries {
            writer.append(
                vec![LogRecord::Create {
                    file_id: entry.id,
                    name: entry.name.clone(),
                }],
                false,
            )?;

            let mut file = CompactedFile {
                blocks: BTreeMap::new(),
                seq: entry.seq,
            };
            let mut next_seq = entry.next_seq;
            let current: Vec<(u64, BlockRef)> =
                entry.blocks.iter().map(|(&index, &block)| (index, block)).collect();

            for batch in current.chunks(batch_blocks) {
                let mut data = Vec::with_capacity(batch.len());
                for (block_index, block) in batch {
                    let block_index = *block_index;
                    match self.store.read_block(entry.id, block_index, block) {
                        Ok(block) => data.push((block_index, block)),
                        Err(NativeIoError::Corruption(reason)) => {
                            tracing::warn!(
                                "Dropping unreadable block {} of {:?}: {}",
                                block_index,
                                entry.name,
                                reason
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                if data.is_empty() {
                    continue;
                }

                let seq = if file.blocks.is_empty() {
                    entry.seq
                } else {
                    next_seq += 1;
                    next_seq - 1
                };
                let parts = data.len() as u32;
                let lens: Vec<(u64, u32)> = data
                    .iter()
                    .map(|(index, block)| (*index, block.len() as u32))
                    .collect();
                let records = data
                    .into_iter()
                    .enumerate()
                    .map(|(part, (block_index, block))| {
                        LogRecord::Block(BlockRecord::new(
                            entry.id,
                            seq,
                            part as u32,
                            parts,
                            block_index,
                            entry.length,
                            block,
                        ))
                    })
                    .collect();

                let pointers = writer.append(records, false)?;
                for ((block_index, len), frame) in lens.into_iter().zip(pointers) {
                    live_bytes += frame.len as u64;
                    file.blocks.insert(block_index, BlockRef { frame, len });
                }
                file.seq = seq;
            }

            if file.blocks.is_empty() && entry.length > 0 {
                writer.append(
                    vec![LogRecord::SetLength {
                        file_id: entry.id,
                        seq: entry.seq,
                        length: entry.length,
                    }],
                    false,
                )?;
            }
            compacted.push(file);
        }

        writer.sync()?;
        Ok((writer, compacted, live_bytes))
    }

    /// Checkpoint or compact if a threshold has been crossed
    ///
    /// Runs with no catalog or file lock held. Failures are logged, never
    /// returned: the operation that triggered maintenance already committed.
    fn maybe_maintain(&self) {
        let Some(_guard) = self.maintenance.try_lock() else {
            return;
        };

        let threshold = self.config.compaction_threshold;
        if threshold > 0 && self.store.dead_bytes() >= threshold {
            if let Err(e) = self.compact_locked() {
                tracing::warn!("Automatic compaction failed: {}", e);
            }
            return;
        }

        let interval = self.config.checkpoint_interval;
        if interval > 0 && self.frames_since_checkpoint.load(Ordering::SeqCst) >= interval {
            if let Err(e) = self.checkpoint_locked() {
                tracing::warn!("Automatic checkpoint failed: {}", e);
            }
        }
    }

    fn note_frames(&self, frames: u64) {
        self.frames_since_checkpoint
            .fetch_add(frames, Ordering::SeqCst);
    }

    /// Close the namespace gracefully
    ///
    /// Writes a final checkpoint and syncs the log. Descriptors still open
    /// are simply dropped.
    pub fn shutdown(self) -> Result<()> {
        self.checkpoint()?;
        self.store.sync()?;
        tracing::info!("Namespace {} shut down", self.config.data_dir.display());
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// What recovery found when the namespace was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn quota_usage(&self) -> QuotaUsage {
        self.quota.usage()
    }

    /// Name of the file an open descriptor refers to
    pub fn descriptor_name(&self, fd: Descriptor) -> Option<String> {
        self.registry
            .resolve(fd)
            .ok()
            .map(|node| node.name().to_string())
    }

    /// Number of descriptors currently open
    pub fn open_handle_count(&self) -> usize {
        self.registry.open_count()
    }

    /// Current block log size in bytes
    pub fn log_size(&self) -> u64 {
        self.store.log_size()
    }

    /// Log bytes the next compaction would reclaim
    pub fn dead_bytes(&self) -> u64 {
        self.store.dead_bytes()
    }

    /// Block size of the open log
    pub fn block_size(&self) -> u64 {
        self.store.block_size()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Path of the block log
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// A file's state in a freshly compacted log
struct CompactedFile {
    blocks: BTreeMap<u64, BlockRef>,
    /// Sequence number of the last group written for the file
    seq: u64,
}

fn check_offset(offset: u64) -> Result<()> {
    if offset > MAX_FILE_SIZE {
        return Err(NativeIoError::InvalidArgument(format!(
            "offset {} exceeds maximum file size",
            offset
        )));
    }
    Ok(())
}

/// Identity for a new log incarnation, always newer than `previous`
fn new_log_id(previous: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    now.max(previous.saturating_add(1))
}
