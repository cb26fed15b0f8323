//! Catalog index checkpoint
//!
//! A periodically written snapshot of the catalog that lets recovery skip
//! the part of the block log it already covers. Recovery never depends on
//! it: a missing, corrupt or stale checkpoint only means a full log scan.
//!
//! ## File Format
//! ```text
//! ┌──────────┬─────────────┬─────────┬────────────┬──────────────────┐
//! │Magic (4) │ Version (2) │ CRC (4) │ Len (8)    │ bincode payload  │
//! └──────────┴─────────────┴─────────┴────────────┴──────────────────┘
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NativeIoError, Result};
use crate::pagestore::sync_dir;

use super::FileEntry;

const CHECKPOINT_MAGIC: &[u8; 4] = b"NIOC";
const CHECKPOINT_VERSION: u16 = 1;
const CHECKPOINT_HEADER_SIZE: usize = 18;

/// Snapshot of the catalog as of a frame boundary in the block log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCheckpoint {
    /// Log incarnation this snapshot belongs to
    pub log_id: u64,

    /// Log offset up to which the snapshot already reflects every frame
    pub covered_offset: u64,

    pub next_lsn: u64,

    pub next_file_id: u64,

    pub files: Vec<FileEntry>,
}

impl CatalogCheckpoint {
    /// Durably replace the checkpoint at `path`
    ///
    /// Written to a temporary file, fsynced, then renamed into place.
    pub fn write(&self, path: &Path) -> Result<()> {
        let payload = bincode::serialize(self)?;
        let crc = crc32fast::hash(&payload);

        let tmp = path.with_extension("ckpt.tmp");
        {
            let mut file = File::create(&tmp)?;
            let mut buf = Vec::with_capacity(CHECKPOINT_HEADER_SIZE + payload.len());
            buf.extend_from_slice(CHECKPOINT_MAGIC);
            buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
            buf.extend_from_slice(&crc.to_le_bytes());
            buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            buf.extend_from_slice(&payload);
            file.write_all(&buf)?;
            file.sync_all()?;
        }

        fs::rename(&tmp, path)?;
        if let Some(dir) = path.parent() {
            sync_dir(dir)?;
        }
        Ok(())
    }

    /// Load the checkpoint at `path`
    ///
    /// Returns `Ok(None)` if there is none and `Corruption` if one exists
    /// but cannot be trusted.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(path)?;
        if bytes.len() < CHECKPOINT_HEADER_SIZE {
            return Err(NativeIoError::Corruption(format!(
                "checkpoint is {} bytes, shorter than its header",
                bytes.len()
            )));
        }
        if &bytes[0..4] != CHECKPOINT_MAGIC {
            return Err(NativeIoError::Corruption(
                "invalid checkpoint magic".to_string(),
            ));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != CHECKPOINT_VERSION {
            return Err(NativeIoError::Corruption(format!(
                "unsupported checkpoint version: {}",
                version
            )));
        }

        let crc = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[10..18]);
        let len = u64::from_le_bytes(len_bytes) as usize;

        let payload = &bytes[CHECKPOINT_HEADER_SIZE..];
        if payload.len() != len {
            return Err(NativeIoError::Corruption(format!(
                "checkpoint payload is {} bytes, header says {}",
                payload.len(),
                len
            )));
        }
        if crc32fast::hash(payload) != crc {
            return Err(NativeIoError::Corruption(
                "checkpoint CRC mismatch".to_string(),
            ));
        }

        let checkpoint = bincode::deserialize(payload)
            .map_err(|e| NativeIoError::Corruption(format!("undecodable checkpoint: {}", e)))?;
        Ok(Some(checkpoint))
    }
}
