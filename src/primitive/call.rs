//! Call definitions
//!
//! One value per primitive operation, so calls can be queued and replayed.

use bytes::Bytes;

/// Call types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Open,
    Close,
    Delete,
    GetAll,
    Read,
    Write,
    SetLength,
    GetLength,
    Flush,
}

/// A primitive call with its arguments
#[derive(Debug, Clone)]
pub enum PrimitiveCall {
    /// Open (creating if absent) a file by name
    Open { name: String },

    /// Close a descriptor
    Close { fd: i32 },

    /// Delete a file by name
    Delete { name: String },

    /// Enumerate all names
    GetAll,

    /// Read up to `length` bytes at `offset`
    Read { fd: i32, length: usize, offset: u64 },

    /// Write `data` at `offset`
    Write { fd: i32, data: Bytes, offset: u64 },

    /// Truncate or extend to `length`
    SetLength { fd: i32, length: u64 },

    GetLength { fd: i32 },

    Flush { fd: i32 },
}

impl PrimitiveCall {
    /// Get the call type
    pub fn call_type(&self) -> CallType {
        match self {
            PrimitiveCall::Open { .. } => CallType::Open,
            PrimitiveCall::Close { .. } => CallType::Close,
            PrimitiveCall::Delete { .. } => CallType::Delete,
            PrimitiveCall::GetAll => CallType::GetAll,
            PrimitiveCall::Read { .. } => CallType::Read,
            PrimitiveCall::Write { .. } => CallType::Write,
            PrimitiveCall::SetLength { .. } => CallType::SetLength,
            PrimitiveCall::GetLength { .. } => CallType::GetLength,
            PrimitiveCall::Flush { .. } => CallType::Flush,
        }
    }

    /// Descriptor the call targets, if any
    pub fn descriptor(&self) -> Option<i32> {
        match self {
            PrimitiveCall::Close { fd }
            | PrimitiveCall::Read { fd, .. }
            | PrimitiveCall::Write { fd, .. }
            | PrimitiveCall::SetLength { fd, .. }
            | PrimitiveCall::GetLength { fd }
            | PrimitiveCall::Flush { fd } => Some(*fd),
            _ => None,
        }
    }

    /// File name the call targets, if any
    pub fn name(&self) -> Option<&str> {
        match self {
            PrimitiveCall::Open { name } | PrimitiveCall::Delete { name } => Some(name),
            _ => None,
        }
    }
}
