//! Tests for Handle Registry
//!
//! These tests verify:
//! - Descriptors are non-negative and resolve to their file
//! - Closed and stale descriptors are rejected, never reused silently
//! - Open-handle counts follow issue/release
//! - The arena limit is enforced
//! - A slot with no generations left is retired

use std::collections::HashSet;
use std::sync::Arc;

use nativeio::catalog::{FileEntry, FileNode};
use nativeio::registry::{Descriptor, HandleRegistry};
use nativeio::NativeIoError;

// =============================================================================
// Helper Functions
// =============================================================================

fn node(id: u64) -> Arc<FileNode> {
    Arc::new(FileNode::new(FileEntry::new(id, format!("f{}", id))))
}

// =============================================================================
// Descriptor Tests
// =============================================================================

#[test]
fn test_descriptor_raw_form() {
    let registry = HandleRegistry::new(4);
    let fd = registry.issue(node(1)).unwrap();

    assert!(fd.as_raw() >= 0);
    assert_eq!(Descriptor::from_raw(fd.as_raw()).unwrap(), fd);
    assert_eq!(fd.slot(), 0);
    assert!(fd.generation() > 0);
}

#[test]
fn test_negative_descriptor_is_invalid() {
    assert!(matches!(
        Descriptor::from_raw(-1),
        Err(NativeIoError::InvalidArgument(_))
    ));
}

#[test]
fn test_unknown_slot_is_not_found() {
    let registry = HandleRegistry::new(4);
    let fd = Descriptor::from_raw(3).unwrap();

    assert!(matches!(registry.resolve(fd), Err(NativeIoError::NotFound(_))));
    assert!(matches!(registry.release(fd), Err(NativeIoError::NotFound(_))));
}

// =============================================================================
// Issue / Release Tests
// =============================================================================

#[test]
fn test_issue_resolve_release() {
    let registry = HandleRegistry::new(4);
    let file = node(1);

    let fd = registry.issue(Arc::clone(&file)).unwrap();
    assert_eq!(file.open_handles(), 1);
    assert_eq!(registry.open_count(), 1);
    assert!(Arc::ptr_eq(&registry.resolve(fd).unwrap(), &file));

    registry.release(fd).unwrap();
    assert_eq!(file.open_handles(), 0);
    assert_eq!(registry.open_count(), 0);
    assert!(matches!(registry.resolve(fd), Err(NativeIoError::Closed(_))));
    assert!(matches!(registry.release(fd), Err(NativeIoError::Closed(_))));
}

#[test]
fn test_sessions_on_same_file_are_independent() {
    let registry = HandleRegistry::new(4);
    let file = node(1);

    let a = registry.issue(Arc::clone(&file)).unwrap();
    let b = registry.issue(Arc::clone(&file)).unwrap();
    assert_ne!(a, b);
    assert_eq!(file.open_handles(), 2);

    registry.release(a).unwrap();
    assert!(registry.resolve(b).is_ok());
    assert_eq!(file.open_handles(), 1);
}

#[test]
fn test_reused_slot_rejects_stale_descriptor() {
    let registry = HandleRegistry::new(1);

    let first = registry.issue(node(1)).unwrap();
    registry.release(first).unwrap();
    let second = registry.issue(node(2)).unwrap();

    assert_eq!(first.slot(), second.slot());
    assert_ne!(first.generation(), second.generation());
    assert!(matches!(registry.resolve(first), Err(NativeIoError::Closed(_))));
    assert_eq!(registry.resolve(second).unwrap().read().id, 2);
}

#[test]
fn test_freed_slots_reused_oldest_first() {
    let registry = HandleRegistry::new(8);

    let a = registry.issue(node(1)).unwrap();
    let b = registry.issue(node(2)).unwrap();
    registry.release(a).unwrap();
    registry.release(b).unwrap();

    assert_eq!(registry.issue(node(3)).unwrap().slot(), a.slot());
    assert_eq!(registry.issue(node(4)).unwrap().slot(), b.slot());
}

#[test]
fn test_arena_limit() {
    let registry = HandleRegistry::new(2);
    assert_eq!(registry.capacity(), 2);

    let a = registry.issue(node(1)).unwrap();
    registry.issue(node(2)).unwrap();
    assert!(matches!(registry.issue(node(3)), Err(NativeIoError::Busy(_))));

    registry.release(a).unwrap();
    assert!(registry.issue(node(3)).is_ok());
}

#[test]
fn test_many_cycles_never_repeat_live_descriptor() {
    let registry = HandleRegistry::new(1);
    let mut previous = registry.issue(node(1)).unwrap();

    for _ in 0..1000 {
        registry.release(previous).unwrap();
        let next = registry.issue(node(1)).unwrap();
        assert_ne!(next, previous);
        assert!(matches!(registry.resolve(previous), Err(NativeIoError::Closed(_))));
        previous = next;
    }
}

#[test]
fn test_exhausted_slot_retired_not_reused() {
    let registry = HandleRegistry::new(2);
    let first = registry.issue(node(1)).unwrap();
    let mut seen = HashSet::from([first]);
    let mut current = first;

    while current.slot() == first.slot() {
        registry.release(current).unwrap();
        current = registry.issue(node(1)).unwrap();
        assert!(seen.insert(current), "descriptor {} issued twice", current);
        assert!(matches!(registry.resolve(first), Err(NativeIoError::Closed(_))));
    }

    assert_eq!(seen.len(), 0x7FFF + 1);
    assert_eq!(registry.retired_count(), 1);
    assert_eq!(current.generation(), 1);
    assert!(matches!(registry.resolve(first), Err(NativeIoError::Closed(_))));
}

#[test]
fn test_registry_busy_once_every_slot_retired() {
    let registry = HandleRegistry::new(1);
    let mut current = registry.issue(node(1)).unwrap();

    while current.generation() < 0x7FFF {
        registry.release(current).unwrap();
        current = registry.issue(node(1)).unwrap();
    }
    registry.release(current).unwrap();

    assert_eq!(registry.retired_count(), 1);
    assert_eq!(registry.open_count(), 0);
    assert!(matches!(registry.issue(node(1)), Err(NativeIoError::Busy(_))));
    assert!(matches!(registry.resolve(current), Err(NativeIoError::Closed(_))));
}
