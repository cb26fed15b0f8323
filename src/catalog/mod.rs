//! Catalog Module
//!
//! Maps file names to file entries within the namespace.
//!
//! ## Responsibilities
//! - Name validation
//! - Create-or-find on open, atomic removal on delete
//! - Snapshot enumeration of names
//! - Periodic checkpoint of the whole catalog index
//!
//! ## Locking
//! The name map sits behind one `RwLock`; every file entry has its own
//! `RwLock` inside a `FileNode`. Lock order is always map → file entry →
//! page store, so name-level operations may take a file lock but file-level
//! operations never take the map lock.

mod checkpoint;
mod entry;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

use crate::error::{NativeIoError, Result};

pub use checkpoint::CatalogCheckpoint;
pub use entry::{BlockRef, FileEntry, FileNode};

/// Name-keyed map of all files in the namespace
pub struct Catalog {
    files: RwLock<BTreeMap<String, Arc<FileNode>>>,
    max_name_len: usize,
}

impl Catalog {
    /// An empty catalog
    pub fn new(max_name_len: usize) -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            max_name_len,
        }
    }

    /// Rebuild a catalog from recovered entries
    pub fn from_entries(entries: impl IntoIterator<Item = FileEntry>, max_name_len: usize) -> Self {
        let files = entries
            .into_iter()
            .map(|entry| (entry.name.clone(), Arc::new(FileNode::new(entry))))
            .collect();
        Self {
            files: RwLock::new(files),
            max_name_len,
        }
    }

    /// Names are 1..=max_name_len characters of `[a-z0-9_]`
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(NativeIoError::InvalidArgument(
                "file name is empty".to_string(),
            ));
        }
        if name.len() > self.max_name_len {
            return Err(NativeIoError::InvalidArgument(format!(
                "file name is {} bytes, limit is {}",
                name.len(),
                self.max_name_len
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(NativeIoError::InvalidArgument(format!(
                "file name {:?} contains disallowed character {:?}",
                name, c
            )));
        }
        Ok(())
    }

    /// Find a file by name
    pub fn lookup(&self, name: &str) -> Option<Arc<FileNode>> {
        self.files.read().get(name).cloned()
    }

    /// Snapshot of all names, in name order
    pub fn names(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Attach to `name`, creating it first if it does not exist
    ///
    /// `create` runs with the map locked exclusively and must make the new
    /// entry durable before returning it. `attach` runs with the map locked
    /// (shared or exclusive), so a concurrent delete cannot slip in between
    /// lookup and attach. Returns `attach`'s value and whether the file was
    /// created.
    pub fn open_or_create<T>(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<FileEntry>,
        attach: impl FnOnce(&Arc<FileNode>) -> Result<T>,
    ) -> Result<(T, bool)> {
        let files = self.files.upgradable_read();
        if let Some(node) = files.get(name) {
            return attach(node).map(|value| (value, false));
        }

        let mut files = RwLockUpgradableReadGuard::upgrade(files);
        let node = Arc::new(FileNode::new(create()?));
        files.insert(name.to_string(), Arc::clone(&node));
        attach(&node).map(|value| (value, true))
    }

    /// Remove `name` if nothing has it open
    ///
    /// `commit` sees the entry under its file lock and must make the removal
    /// durable; the name disappears only if it succeeds.
    pub fn remove(
        &self,
        name: &str,
        commit: impl FnOnce(&FileEntry) -> Result<()>,
    ) -> Result<Arc<FileNode>> {
        let mut files = self.files.write();
        match files.entry(name.to_string()) {
            Entry::Vacant(_) => Err(NativeIoError::NotFound(format!("file {:?}", name))),
            Entry::Occupied(slot) => {
                let open = slot.get().open_handles();
                if open > 0 {
                    return Err(NativeIoError::Busy(format!(
                        "file {:?} has {} open descriptor(s)",
                        name, open
                    )));
                }
                {
                    let entry = slot.get().read();
                    commit(&entry)?;
                }
                Ok(slot.remove())
            }
        }
    }

    /// Total quota consumed by all files
    pub fn consumed(&self, entry_footprint: u64) -> u64 {
        self.files
            .read()
            .values()
            .map(|node| node.read().consumed(entry_footprint))
            .sum()
    }

    // =========================================================================
    // Whole-map access for checkpoint and compaction
    // =========================================================================

    pub(crate) fn read_map(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<FileNode>>> {
        self.files.read()
    }

    pub(crate) fn write_map(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<FileNode>>> {
        self.files.write()
    }
}
