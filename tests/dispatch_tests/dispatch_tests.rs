//! Tests for Dispatcher
//!
//! These tests verify:
//! - Calls submitted through the pool complete with the same outcomes
//! - Calls on one descriptor run in submission order
//! - A close and a delete of the same file run in submission order
//! - Shutdown drains queued work and refuses new calls

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use nativeio::{Config, Dispatcher, Namespace, NativeIoError, Outcome, PrimitiveCall};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_namespace() -> (TempDir, Arc<Namespace>) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .block_size(16)
        .build();
    (temp_dir, Arc::new(Namespace::open(config).unwrap()))
}

fn open(dispatcher: &Dispatcher, name: &str) -> i32 {
    let ticket = dispatcher
        .submit(PrimitiveCall::Open {
            name: name.to_string(),
        })
        .unwrap();
    match ticket.wait().unwrap() {
        Outcome::Descriptor(fd) => fd.as_raw(),
        other => panic!("expected descriptor, got {:?}", other),
    }
}

// =============================================================================
// Dispatch Tests
// =============================================================================

#[test]
fn test_zero_workers_rejected() {
    let (_temp, ns) = setup_namespace();
    assert!(matches!(
        Dispatcher::new(ns, 0),
        Err(NativeIoError::Config(_))
    ));
}

#[test]
fn test_open_write_read_through_tickets() {
    let (_temp, ns) = setup_namespace();
    let dispatcher = Dispatcher::new(Arc::clone(&ns), 3).unwrap();
    assert_eq!(dispatcher.worker_count(), 3);

    let fd = open(&dispatcher, "f");
    let written = dispatcher
        .submit(PrimitiveCall::Write {
            fd,
            data: Bytes::from_static(b"queued"),
            offset: 0,
        })
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(written, Outcome::Count(6));

    let read = dispatcher
        .submit(PrimitiveCall::Read {
            fd,
            length: 6,
            offset: 0,
        })
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(read, Outcome::Bytes(Bytes::from_static(b"queued")));
}

#[test]
fn test_same_descriptor_runs_in_order() {
    let (_temp, ns) = setup_namespace();
    let dispatcher = Dispatcher::new(Arc::clone(&ns), 4).unwrap();
    let fd = open(&dispatcher, "ordered");

    let tickets: Vec<_> = (0..50u8)
        .map(|i| {
            dispatcher
                .submit(PrimitiveCall::Write {
                    fd,
                    data: Bytes::from(vec![i; 8]),
                    offset: 0,
                })
                .unwrap()
        })
        .collect();
    for ticket in tickets {
        assert_eq!(ticket.wait().unwrap(), Outcome::Count(8));
    }

    let read = dispatcher
        .submit(PrimitiveCall::Read {
            fd,
            length: 8,
            offset: 0,
        })
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(read, Outcome::Bytes(Bytes::from(vec![49u8; 8])));
}

#[test]
fn test_close_then_delete_keeps_order() {
    let (_temp, ns) = setup_namespace();
    let dispatcher = Dispatcher::new(Arc::clone(&ns), 4).unwrap();

    for round in 0..20 {
        let name = format!("doomed_{}", round);
        let fd = open(&dispatcher, &name);

        let writes: Vec<_> = (0..50u64)
            .map(|i| {
                dispatcher
                    .submit(PrimitiveCall::Write {
                        fd,
                        data: Bytes::from_static(b"data"),
                        offset: i * 4,
                    })
                    .unwrap()
            })
            .collect();
        let close = dispatcher.submit(PrimitiveCall::Close { fd }).unwrap();
        let delete = dispatcher
            .submit(PrimitiveCall::Delete { name: name.clone() })
            .unwrap();

        for ticket in writes {
            assert_eq!(ticket.wait().unwrap(), Outcome::Count(4));
        }
        assert_eq!(close.wait().unwrap(), Outcome::Status);
        assert_eq!(delete.wait().unwrap(), Outcome::Status, "delete of {}", name);
    }

    assert!(ns.get_all().is_empty());
    assert_eq!(ns.open_handle_count(), 0);
}

#[test]
fn test_errors_come_back_through_ticket() {
    let (_temp, ns) = setup_namespace();
    let dispatcher = Dispatcher::new(ns, 2).unwrap();

    let result = dispatcher
        .submit(PrimitiveCall::Delete {
            name: "missing".to_string(),
        })
        .unwrap()
        .wait();
    assert!(matches!(result, Err(NativeIoError::NotFound(_))));

    let result = dispatcher
        .submit(PrimitiveCall::Close { fd: -3 })
        .unwrap()
        .wait();
    assert!(matches!(result, Err(NativeIoError::InvalidArgument(_))));
}

#[test]
fn test_concurrent_submitters() {
    let (_temp, ns) = setup_namespace();
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&ns), 4).unwrap());

    let handles: Vec<_> = (0..6u8)
        .map(|t| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                let fd = open(&dispatcher, &format!("file_{}", t));
                for i in 0..10u64 {
                    let ticket = dispatcher
                        .submit(PrimitiveCall::Write {
                            fd,
                            data: Bytes::from(vec![t; 4]),
                            offset: i * 4,
                        })
                        .unwrap();
                    assert_eq!(ticket.wait().unwrap(), Outcome::Count(4));
                }
                dispatcher
                    .submit(PrimitiveCall::Close { fd })
                    .unwrap()
                    .wait()
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ns.get_all().len(), 6);
    assert_eq!(ns.open_handle_count(), 0);
    let fd = ns.open_file("file_3").unwrap();
    assert_eq!(&ns.read(fd, 40, 0).unwrap()[..], &[3u8; 40][..]);
}

#[test]
fn test_try_wait_and_timeout() {
    let (_temp, ns) = setup_namespace();
    let dispatcher = Dispatcher::new(ns, 1).unwrap();

    let ticket = dispatcher.submit(PrimitiveCall::GetAll).unwrap();
    let outcome = match ticket.wait_timeout(Duration::from_secs(5)) {
        Ok(result) => result.unwrap(),
        Err(_) => panic!("GetAll did not complete"),
    };
    assert_eq!(outcome, Outcome::Names(Vec::new()));

    let ticket = dispatcher.submit(PrimitiveCall::GetAll).unwrap();
    let mut result = None;
    for _ in 0..500 {
        result = ticket.try_wait();
        if result.is_some() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(matches!(result, Some(Ok(Outcome::Names(_)))));
}

#[test]
fn test_shutdown_drains_and_refuses() {
    let (_temp, ns) = setup_namespace();
    let mut dispatcher = Dispatcher::new(Arc::clone(&ns), 2).unwrap();
    let fd = open(&dispatcher, "f");

    let ticket = dispatcher
        .submit(PrimitiveCall::Write {
            fd,
            data: Bytes::from_static(b"last"),
            offset: 0,
        })
        .unwrap();
    dispatcher.shutdown();

    assert_eq!(ticket.wait().unwrap(), Outcome::Count(4));
    assert_eq!(dispatcher.worker_count(), 0);
    assert!(matches!(
        dispatcher.submit(PrimitiveCall::GetAll),
        Err(NativeIoError::Busy(_))
    ));
}

#[test]
fn test_namespace_released_after_drop() {
    let (_temp, ns) = setup_namespace();
    let dispatcher = Dispatcher::new(Arc::clone(&ns), 2).unwrap();
    open(&dispatcher, "f");
    drop(dispatcher);

    let ns = Arc::try_unwrap(ns).unwrap_or_else(|_| panic!("workers still hold the namespace"));
    assert_eq!(ns.get_all(), vec!["f"]);
    ns.shutdown().unwrap();
}
