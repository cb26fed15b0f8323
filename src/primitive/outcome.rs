//! Outcome definitions
//!
//! What a successful primitive call hands back.

use bytes::Bytes;

use crate::registry::Descriptor;

/// Successful result of a `PrimitiveCall`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Open: the new descriptor
    Descriptor(Descriptor),

    /// Close, Delete, SetLength, Flush
    Status,

    /// Read: the bytes read (possibly fewer than asked for)
    Bytes(Bytes),

    /// Write: bytes written
    Count(usize),

    /// GetAll: snapshot of names
    Names(Vec<String>),

    /// GetLength
    Length(u64),
}

impl Outcome {
    /// Integer form of the outcome as the primitive surface reports it
    ///
    /// Reads report the number of bytes read and enumeration the name count.
    pub fn as_status(&self) -> i64 {
        match self {
            Outcome::Descriptor(fd) => fd.as_raw() as i64,
            Outcome::Status => 0,
            Outcome::Count(n) => *n as i64,
            Outcome::Length(len) => *len as i64,
            Outcome::Bytes(data) => data.len() as i64,
            Outcome::Names(names) => names.len() as i64,
        }
    }
}
