//! Tests for the catalog checkpoint
//!
//! These tests verify:
//! - A written checkpoint loads back intact
//! - A missing checkpoint is not an error
//! - Damaged checkpoints are reported as corruption
//! - Rewriting replaces the previous checkpoint and leaves no temp file

use std::path::PathBuf;

use nativeio::catalog::{BlockRef, CatalogCheckpoint, FileEntry};
use nativeio::pagestore::FramePointer;
use nativeio::NativeIoError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_checkpoint() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("catalog.ckpt");
    (temp_dir, path)
}

fn sample(log_id: u64) -> CatalogCheckpoint {
    let mut entry = FileEntry::new(3, "data");
    entry.apply_block(
        4,
        0,
        12,
        BlockRef {
            frame: FramePointer {
                offset: 18,
                len: 60,
                lsn: 2,
            },
            len: 12,
        },
    );

    CatalogCheckpoint {
        log_id,
        covered_offset: 78,
        next_lsn: 3,
        next_file_id: 4,
        files: vec![entry, FileEntry::new(1, "empty")],
    }
}

// =============================================================================
// Load Tests
// =============================================================================

#[test]
fn test_write_then_load() {
    let (_temp, path) = setup_temp_checkpoint();
    let checkpoint = sample(42);

    checkpoint.write(&path).unwrap();
    let loaded = CatalogCheckpoint::load(&path).unwrap().unwrap();

    assert_eq!(loaded, checkpoint);
    assert_eq!(loaded.files[0].blocks[&0].len, 12);
}

#[test]
fn test_missing_checkpoint_is_none() {
    let (_temp, path) = setup_temp_checkpoint();
    assert!(CatalogCheckpoint::load(&path).unwrap().is_none());
}

#[test]
fn test_rewrite_replaces_and_cleans_up() {
    let (temp, path) = setup_temp_checkpoint();

    sample(1).write(&path).unwrap();
    sample(2).write(&path).unwrap();

    assert_eq!(CatalogCheckpoint::load(&path).unwrap().unwrap().log_id, 2);
    let leftovers: Vec<_> = std::fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1);
}

// =============================================================================
// Damage Tests
// =============================================================================

#[test]
fn test_flipped_byte_is_corruption() {
    let (_temp, path) = setup_temp_checkpoint();
    sample(1).write(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        CatalogCheckpoint::load(&path),
        Err(NativeIoError::Corruption(_))
    ));
}

#[test]
fn test_truncated_is_corruption() {
    let (_temp, path) = setup_temp_checkpoint();
    sample(1).write(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(matches!(
        CatalogCheckpoint::load(&path),
        Err(NativeIoError::Corruption(_))
    ));
}

#[test]
fn test_foreign_file_is_corruption() {
    let (_temp, path) = setup_temp_checkpoint();
    std::fs::write(&path, b"this is not a checkpoint at all").unwrap();

    assert!(matches!(
        CatalogCheckpoint::load(&path),
        Err(NativeIoError::Corruption(_))
    ));
}
