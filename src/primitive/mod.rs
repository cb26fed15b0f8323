//! Primitive Module
//!
//! The integer-returning call surface a caller ports POSIX-style code against.
//!
//! ## Operations
//! ```text
//! ┌────────────┬──────────────────────────────┬────────────────────────────┐
//! │ Call       │ Input                        │ Output                     │
//! ├────────────┼──────────────────────────────┼────────────────────────────┤
//! │ open       │ name                         │ descriptor ≥ 0 | code      │
//! │ close      │ fd                           │ 0 | code                   │
//! │ delete     │ name                         │ 0 | code                   │
//! │ get_all    │                              │ names (count = len)        │
//! │ read       │ fd, buf, offset              │ bytes read ≥ 0 | code      │
//! │ write      │ fd, buf, offset              │ bytes written ≥ 0 | code   │
//! │ set_length │ fd, length                   │ 0 | code                   │
//! │ get_length │ fd                           │ length ≥ 0 | code          │
//! │ flush      │ fd                           │ 0 | code                   │
//! └────────────┴──────────────────────────────┴────────────────────────────┘
//! ```
//!
//! ### Error Codes
//! - -2: NOT_FOUND
//! - -5: IO_FAILURE
//! - -9: CLOSED
//! - -16: BUSY
//! - -22: INVALID_ARGUMENT
//! - -28: QUOTA_EXCEEDED
//! - -74: CORRUPTION

mod call;
mod outcome;

use std::sync::Arc;

pub use call::{CallType, PrimitiveCall};
pub use outcome::Outcome;

use crate::error::{NativeIoError, Result};
use crate::namespace::Namespace;
use crate::registry::Descriptor;

/// Integer call surface over a shared namespace
#[derive(Clone)]
pub struct Primitives {
    namespace: Arc<Namespace>,
}

impl Primitives {
    pub fn new(namespace: Arc<Namespace>) -> Self {
        Self { namespace }
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Open (creating if absent); returns the descriptor or a negative code
    pub fn open(&self, name: &str) -> i32 {
        match self.namespace.open_file(name) {
            Ok(fd) => fd.as_raw(),
            Err(e) => failed("open", &e),
        }
    }

    pub fn close(&self, fd: i32) -> i32 {
        status(
            "close",
            Descriptor::from_raw(fd).and_then(|fd| self.namespace.close(fd)),
        )
    }

    pub fn delete(&self, name: &str) -> i32 {
        status("delete", self.namespace.delete(name))
    }

    /// Snapshot of all names; the count is the vector's length
    pub fn get_all(&self) -> Vec<String> {
        self.namespace.get_all()
    }

    /// Read into `buf` from `offset`; returns the number of bytes read
    pub fn read(&self, fd: i32, buf: &mut [u8], offset: u64) -> i32 {
        let result = buffer_len(buf.len())
            .and_then(|_| Descriptor::from_raw(fd))
            .and_then(|fd| self.namespace.read(fd, buf.len(), offset));
        match result {
            Ok(data) => {
                buf[..data.len()].copy_from_slice(&data);
                data.len() as i32
            }
            Err(e) => failed("read", &e),
        }
    }

    /// Write all of `buf` at `offset`; returns the number of bytes written
    pub fn write(&self, fd: i32, buf: &[u8], offset: u64) -> i32 {
        let result = buffer_len(buf.len())
            .and_then(|_| Descriptor::from_raw(fd))
            .and_then(|fd| self.namespace.write(fd, buf, offset));
        match result {
            Ok(written) => written as i32,
            Err(e) => failed("write", &e),
        }
    }

    pub fn set_length(&self, fd: i32, length: u64) -> i32 {
        status(
            "set_length",
            Descriptor::from_raw(fd).and_then(|fd| self.namespace.set_length(fd, length)),
        )
    }

    /// Logical length, or a negative code
    pub fn get_length(&self, fd: i32) -> i64 {
        match Descriptor::from_raw(fd).and_then(|fd| self.namespace.get_length(fd)) {
            Ok(length) => length as i64,
            Err(e) => failed("get_length", &e) as i64,
        }
    }

    pub fn flush(&self, fd: i32) -> i32 {
        status(
            "flush",
            Descriptor::from_raw(fd).and_then(|fd| self.namespace.flush(fd)),
        )
    }
}

fn buffer_len(len: usize) -> Result<()> {
    if len > i32::MAX as usize {
        return Err(NativeIoError::InvalidArgument(format!(
            "buffer of {} bytes does not fit the result",
            len
        )));
    }
    Ok(())
}

fn status(call: &str, result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => failed(call, &e),
    }
}

fn failed(call: &str, err: &NativeIoError) -> i32 {
    tracing::warn!("{} failed: {}", call, err);
    err.code()
}
