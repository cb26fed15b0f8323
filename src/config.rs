//! Configuration for NativeIO
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{NativeIoError, Result};

/// Largest block size accepted for a new log (1 MiB)
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Upper bound on simultaneously open descriptors (16-bit slot index)
pub const MAX_OPEN_HANDLES: usize = 1 << 16;

/// Main configuration for a NativeIO namespace
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the namespace
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── blocks.log       (append-only block log)
    ///     └── catalog.ckpt     (catalog index checkpoint)
    pub data_dir: PathBuf,

    /// Block size used when a fresh log is created. An existing log keeps
    /// the block size recorded in its header.
    pub block_size: usize,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the block log
    pub sync_strategy: SyncStrategy,

    /// Frames appended between catalog checkpoints (0 = only on shutdown)
    pub checkpoint_interval: u64,

    /// Dead log bytes that trigger compaction (0 = never automatically)
    pub compaction_threshold: u64,

    /// Block data compaction holds in memory and writes as one group
    pub compaction_batch_bytes: usize,

    // -------------------------------------------------------------------------
    // Quota Configuration
    // -------------------------------------------------------------------------
    /// Total bytes the namespace may consume
    pub capacity: u64,

    /// Bytes charged against the quota for every existing file
    pub entry_footprint: u64,

    // -------------------------------------------------------------------------
    // Catalog / Handle Configuration
    // -------------------------------------------------------------------------
    /// Maximum file name length in bytes
    pub max_name_len: usize,

    /// Maximum simultaneously open descriptors
    pub max_open_handles: usize,

    // -------------------------------------------------------------------------
    // Dispatch Configuration
    // -------------------------------------------------------------------------
    /// Worker threads used by the asynchronous dispatcher
    pub dispatch_workers: usize,
}

/// Block log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every committed batch (safest, slowest)
    EveryWrite,

    /// fsync after N committed batches (balanced durability/performance).
    /// Create, delete, close and flush always sync.
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./nativeio_data"),
            block_size: 4096,
            sync_strategy: SyncStrategy::EveryNEntries { count: 64 },
            checkpoint_interval: 4096,
            compaction_threshold: 64 * 1024 * 1024, // 64 MB
            compaction_batch_bytes: 1024 * 1024,    // 1 MB
            capacity: 256 * 1024 * 1024,            // 256 MB
            entry_footprint: 64,
            max_name_len: 100,
            max_open_handles: 1024,
            dispatch_workers: 4,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(NativeIoError::Config(format!(
                "block_size must be in 1..={}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.compaction_batch_bytes == 0 {
            return Err(NativeIoError::Config(
                "compaction_batch_bytes must be non-zero".to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(NativeIoError::Config("capacity must be non-zero".to_string()));
        }
        if self.max_name_len == 0 {
            return Err(NativeIoError::Config(
                "max_name_len must be non-zero".to_string(),
            ));
        }
        if self.max_open_handles == 0 || self.max_open_handles > MAX_OPEN_HANDLES {
            return Err(NativeIoError::Config(format!(
                "max_open_handles must be in 1..={}, got {}",
                MAX_OPEN_HANDLES, self.max_open_handles
            )));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(NativeIoError::Config(
                "EveryNEntries count must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for the namespace)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the block size used for a fresh log
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the log sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the number of frames between checkpoints
    pub fn checkpoint_interval(mut self, frames: u64) -> Self {
        self.config.checkpoint_interval = frames;
        self
    }

    /// Set the dead-byte threshold for automatic compaction
    pub fn compaction_threshold(mut self, bytes: u64) -> Self {
        self.config.compaction_threshold = bytes;
        self
    }

    /// Set how much block data compaction copies per group
    pub fn compaction_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.compaction_batch_bytes = bytes;
        self
    }

    /// Set the namespace capacity (in bytes)
    pub fn capacity(mut self, bytes: u64) -> Self {
        self.config.capacity = bytes;
        self
    }

    /// Set the namespace capacity in MiB
    pub fn capacity_mib(self, mib: u64) -> Result<Self> {
        let bytes = mib.checked_mul(1024 * 1024).ok_or_else(|| {
            NativeIoError::Config(format!("capacity of {} MiB is too large", mib))
        })?;
        Ok(self.capacity(bytes))
    }

    /// Set the per-file quota footprint (in bytes)
    pub fn entry_footprint(mut self, bytes: u64) -> Self {
        self.config.entry_footprint = bytes;
        self
    }

    /// Set the maximum file name length
    pub fn max_name_len(mut self, len: usize) -> Self {
        self.config.max_name_len = len;
        self
    }

    /// Set the maximum number of open descriptors
    pub fn max_open_handles(mut self, count: usize) -> Self {
        self.config.max_open_handles = count;
        self
    }

    /// Set the dispatcher worker count
    pub fn dispatch_workers(mut self, count: usize) -> Self {
        self.config.dispatch_workers = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
