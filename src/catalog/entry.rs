//! File entries
//!
//! Per-file metadata owned by the catalog, and the lock that guards it.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::pagestore::FramePointer;

/// Where the current version of one block lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Frame holding the block record
    pub frame: FramePointer,

    /// Valid bytes of the block; anything past this reads as zero
    pub len: u32,
}

/// Catalog record for one named file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Stable identity, never reused within a namespace
    pub id: u64,

    pub name: String,

    /// Logical length in bytes
    pub length: u64,

    /// Sequence number of the last committed write or resize
    pub seq: u64,

    /// Sequence number the next write will use. Always greater than any
    /// sequence number seen in the log for this file, committed or not.
    pub next_seq: u64,

    /// Allocation map: block index → current block version
    pub blocks: BTreeMap<u64, BlockRef>,
}

impl FileEntry {
    /// A new, zero-length file
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            length: 0,
            seq: 0,
            next_seq: 1,
            blocks: BTreeMap::new(),
        }
    }

    /// Make sure `seq` is never handed out again
    pub fn observe_seq(&mut self, seq: u64) {
        self.next_seq = self.next_seq.max(seq.saturating_add(1));
    }

    /// Install one committed block of write `seq`
    ///
    /// Returns the block version it replaced, if any.
    pub fn apply_block(
        &mut self,
        seq: u64,
        block_index: u64,
        file_len: u64,
        block: BlockRef,
    ) -> Option<BlockRef> {
        self.seq = seq;
        self.length = file_len;
        self.observe_seq(seq);
        self.blocks.insert(block_index, block)
    }

    /// Resize to `length` as change `seq`
    ///
    /// Shrinking drops whole blocks past the new end and clamps the block
    /// that straddles it, so extending again later reads zeros there.
    /// Returns the blocks that are no longer referenced.
    pub fn apply_length(&mut self, seq: u64, length: u64, block_size: u64) -> Vec<BlockRef> {
        self.seq = seq;
        self.observe_seq(seq);

        let mut dropped = Vec::new();
        if length < self.length {
            let first_dead = length.div_ceil(block_size);
            dropped = self.blocks.split_off(&first_dead).into_values().collect();

            let tail_index = length / block_size;
            let tail_len = length - tail_index * block_size;
            if tail_len > 0 {
                if let Some(tail) = self.blocks.get_mut(&tail_index) {
                    tail.len = tail.len.min(tail_len as u32);
                }
            }
        }

        self.length = length;
        dropped
    }

    /// Byte ranges backed by stored blocks, coalesced and in order
    pub fn allocation_map(&self, block_size: u64) -> Vec<Range<u64>> {
        let mut ranges: Vec<Range<u64>> = Vec::new();
        for (&index, block) in &self.blocks {
            let start = index * block_size;
            let end = start + block.len as u64;
            match ranges.last_mut() {
                Some(last) if last.end == start => last.end = end,
                _ => ranges.push(start..end),
            }
        }
        ranges
    }

    /// Log bytes held alive by this file's blocks
    pub fn live_frame_bytes(&self) -> u64 {
        self.blocks.values().map(|b| b.frame.len as u64).sum()
    }

    /// Quota consumed by this file
    pub fn consumed(&self, entry_footprint: u64) -> u64 {
        self.length.saturating_add(entry_footprint)
    }
}

/// A file entry behind its per-file lock, plus the count of open
/// descriptors attached to it
#[derive(Debug)]
pub struct FileNode {
    /// Copy of the entry name, readable without the entry lock
    name: String,
    entry: RwLock<FileEntry>,
    open_handles: AtomicUsize,
}

impl FileNode {
    pub fn new(entry: FileEntry) -> Self {
        Self {
            name: entry.name.clone(),
            entry: RwLock::new(entry),
            open_handles: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared access (reads, stat)
    pub fn read(&self) -> RwLockReadGuard<'_, FileEntry> {
        self.entry.read()
    }

    /// Exclusive access (writes, resize)
    pub fn write(&self) -> RwLockWriteGuard<'_, FileEntry> {
        self.entry.write()
    }

    /// Number of open descriptors on this file
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self) {
        self.open_handles.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn detach(&self) {
        let _ = self
            .open_handles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}
