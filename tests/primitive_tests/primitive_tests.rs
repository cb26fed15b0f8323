//! Tests for the primitive call surface
//!
//! These tests verify:
//! - The reference open/write/read/close/delete walkthrough
//! - Every failure maps to its negative integer code
//! - PrimitiveCall values execute to the matching Outcome

use std::sync::Arc;

use bytes::Bytes;
use nativeio::error::codes;
use nativeio::primitive::CallType;
use nativeio::{Config, Namespace, NativeIoError, Outcome, PrimitiveCall, Primitives, SyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_primitives() -> (TempDir, Primitives) {
    setup_with_capacity(1024 * 1024)
}

fn setup_with_capacity(capacity: u64) -> (TempDir, Primitives) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .block_size(16)
        .sync_strategy(SyncStrategy::EveryWrite)
        .capacity(capacity)
        .entry_footprint(0)
        .build();
    let namespace = Arc::new(Namespace::open(config).unwrap());
    (temp_dir, Primitives::new(namespace))
}

// =============================================================================
// Walkthrough
// =============================================================================

#[test]
fn test_reference_walkthrough() {
    let (_temp, io) = setup_primitives();

    let fd = io.open("f");
    assert!(fd >= 0);

    assert_eq!(io.write(fd, &[1u8; 10], 4), 10);

    let mut buf = [0xAAu8; 6];
    assert_eq!(io.read(fd, &mut buf, 0), 6);
    assert_eq!(buf, [0, 0, 0, 0, 1, 1]);

    assert_eq!(io.close(fd), 0);
    assert!(io.get_all().contains(&"f".to_string()));

    assert_eq!(io.delete("f"), 0);
    assert!(!io.get_all().contains(&"f".to_string()));
}

#[test]
fn test_length_and_flush() {
    let (_temp, io) = setup_primitives();
    let fd = io.open("f");

    assert_eq!(io.get_length(fd), 0);
    assert_eq!(io.write(fd, b"abcdef", 0), 6);
    assert_eq!(io.get_length(fd), 6);

    assert_eq!(io.set_length(fd, 2), 0);
    assert_eq!(io.get_length(fd), 2);
    assert_eq!(io.flush(fd), 0);
}

#[test]
fn test_short_read_leaves_rest_of_buffer() {
    let (_temp, io) = setup_primitives();
    let fd = io.open("f");
    io.write(fd, b"abc", 0);

    let mut buf = [b'-'; 8];
    assert_eq!(io.read(fd, &mut buf, 1), 2);
    assert_eq!(&buf, b"bc------");
    assert_eq!(io.read(fd, &mut buf, 3), 0);
}

// =============================================================================
// Error Code Tests
// =============================================================================

#[test]
fn test_negative_descriptor_is_invalid() {
    let (_temp, io) = setup_primitives();
    assert_eq!(io.close(-1), codes::INVALID_ARGUMENT);
    assert_eq!(io.get_length(-7), codes::INVALID_ARGUMENT as i64);
    assert_eq!(io.read(-1, &mut [0u8; 4], 0), codes::INVALID_ARGUMENT);
}

#[test]
fn test_unknown_descriptor_not_found() {
    let (_temp, io) = setup_primitives();
    assert_eq!(io.close(999), codes::NOT_FOUND);
    assert_eq!(io.write(999, b"x", 0), codes::NOT_FOUND);
}

#[test]
fn test_closed_descriptor_code() {
    let (_temp, io) = setup_primitives();
    let fd = io.open("f");
    assert_eq!(io.close(fd), 0);

    assert_eq!(io.close(fd), codes::CLOSED);
    assert_eq!(io.flush(fd), codes::CLOSED);
    assert_eq!(io.set_length(fd, 1), codes::CLOSED);
}

#[test]
fn test_delete_codes() {
    let (_temp, io) = setup_primitives();
    assert_eq!(io.delete("missing"), codes::NOT_FOUND);

    let fd = io.open("busy");
    assert_eq!(io.delete("busy"), codes::BUSY);
    io.close(fd);
    assert_eq!(io.delete("busy"), 0);
}

#[test]
fn test_invalid_name_code() {
    let (_temp, io) = setup_primitives();
    assert_eq!(io.open("Bad Name"), codes::INVALID_ARGUMENT);
    assert_eq!(io.delete(""), codes::INVALID_ARGUMENT);
    assert!(io.get_all().is_empty());
}

#[test]
fn test_quota_exceeded_code() {
    let (_temp, io) = setup_with_capacity(32);
    let fd = io.open("f");

    assert_eq!(io.write(fd, &[1u8; 32], 0), 32);
    assert_eq!(io.write(fd, b"!", 32), codes::QUOTA_EXCEEDED);
    assert_eq!(io.set_length(fd, 33), codes::QUOTA_EXCEEDED);
    assert_eq!(io.get_length(fd), 32);
}

#[test]
fn test_codes_match_errors() {
    assert_eq!(NativeIoError::NotFound("x".into()).code(), -2);
    assert_eq!(NativeIoError::Closed(3).code(), -9);
    assert_eq!(NativeIoError::Busy("x".into()).code(), -16);
    assert_eq!(NativeIoError::InvalidArgument("x".into()).code(), -22);
    assert_eq!(
        NativeIoError::QuotaExceeded {
            requested: 1,
            available: 0
        }
        .code(),
        -28
    );
    assert_eq!(NativeIoError::Corruption("x".into()).code(), -74);
    let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let io_err = NativeIoError::from(io_err);
    assert_eq!(io_err.code(), -5);

    assert!(!io_err.is_recoverable());
    assert!(!NativeIoError::Corruption("x".into()).is_recoverable());
    assert!(NativeIoError::Busy("x".into()).is_recoverable());
    assert!(NativeIoError::Closed(1).is_recoverable());
}

// =============================================================================
// PrimitiveCall Tests
// =============================================================================

#[test]
fn test_execute_calls() {
    let (_temp, io) = setup_primitives();
    let ns = io.namespace();

    let fd = match ns
        .execute(PrimitiveCall::Open {
            name: "f".to_string(),
        })
        .unwrap()
    {
        Outcome::Descriptor(fd) => fd.as_raw(),
        other => panic!("expected descriptor, got {:?}", other),
    };

    let written = ns
        .execute(PrimitiveCall::Write {
            fd,
            data: Bytes::from_static(b"hello"),
            offset: 0,
        })
        .unwrap();
    assert_eq!(written, Outcome::Count(5));

    let read = ns
        .execute(PrimitiveCall::Read {
            fd,
            length: 10,
            offset: 1,
        })
        .unwrap();
    assert_eq!(read, Outcome::Bytes(Bytes::from_static(b"ello")));
    assert_eq!(read.as_status(), 4);

    assert_eq!(
        ns.execute(PrimitiveCall::GetLength { fd }).unwrap(),
        Outcome::Length(5)
    );
    assert_eq!(
        ns.execute(PrimitiveCall::GetAll).unwrap(),
        Outcome::Names(vec!["f".to_string()])
    );
    assert_eq!(
        ns.execute(PrimitiveCall::Close { fd }).unwrap(),
        Outcome::Status
    );

    let err = ns.execute(PrimitiveCall::Flush { fd }).unwrap_err();
    assert_eq!(err.code(), codes::CLOSED);
}

#[test]
fn test_call_metadata() {
    let write = PrimitiveCall::Write {
        fd: 4,
        data: Bytes::new(),
        offset: 0,
    };
    assert_eq!(write.call_type(), CallType::Write);
    assert_eq!(write.descriptor(), Some(4));
    assert_eq!(write.name(), None);

    let open = PrimitiveCall::Open {
        name: "f".to_string(),
    };
    assert_eq!(open.call_type(), CallType::Open);
    assert_eq!(open.descriptor(), None);
    assert_eq!(open.name(), Some("f"));

    assert_eq!(PrimitiveCall::GetAll.descriptor(), None);
    assert_eq!(Outcome::Status.as_status(), 0);
}
