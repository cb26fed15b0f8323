//! Error types for NativeIO
//!
//! Provides a unified error type for all namespace operations, plus the
//! negative integer codes the primitive surface hands back to callers.

use thiserror::Error;

/// Result type alias using NativeIoError
pub type Result<T> = std::result::Result<T, NativeIoError>;

/// Unified error type for NativeIO operations
#[derive(Debug, Error)]
pub enum NativeIoError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Underlying medium failure (also used for an unreadable block log)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup / Argument Errors
    // -------------------------------------------------------------------------
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Descriptor {0} is closed")]
    Closed(i32),

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Quota exceeded: requested {requested} bytes, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

// =============================================================================
// Primitive Error Codes
// =============================================================================

/// Negative status codes returned by the integer surface.
///
/// Values follow the Linux errno numbering so a caller porting POSIX-style
/// code can compare against familiar constants.
pub mod codes {
    pub const NOT_FOUND: i32 = -2;
    pub const IO_FAILURE: i32 = -5;
    pub const CLOSED: i32 = -9;
    pub const BUSY: i32 = -16;
    pub const INVALID_ARGUMENT: i32 = -22;
    pub const QUOTA_EXCEEDED: i32 = -28;
    pub const CORRUPTION: i32 = -74;
}

impl NativeIoError {
    /// Negative integer code for this error
    pub fn code(&self) -> i32 {
        match self {
            NativeIoError::Io(_) | NativeIoError::Serialization(_) => codes::IO_FAILURE,
            NativeIoError::NotFound(_) => codes::NOT_FOUND,
            NativeIoError::InvalidArgument(_) | NativeIoError::Config(_) => {
                codes::INVALID_ARGUMENT
            }
            NativeIoError::Busy(_) => codes::BUSY,
            NativeIoError::Closed(_) => codes::CLOSED,
            NativeIoError::QuotaExceeded { .. } => codes::QUOTA_EXCEEDED,
            NativeIoError::Corruption(_) => codes::CORRUPTION,
        }
    }

    /// Whether the caller can retry with different arguments without any
    /// state having changed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NativeIoError::NotFound(_)
                | NativeIoError::InvalidArgument(_)
                | NativeIoError::Busy(_)
                | NativeIoError::Closed(_)
                | NativeIoError::QuotaExceeded { .. }
        )
    }
}

impl From<bincode::Error> for NativeIoError {
    fn from(err: bincode::Error) -> Self {
        NativeIoError::Serialization(err.to_string())
    }
}
