//! # NativeIO
//!
//! A sandboxed, byte-addressable file store with:
//! - A flat namespace of named files sharing one quota
//! - Descriptor-based reads and all-or-nothing writes
//! - An append-only block log with per-write sequence numbers and checksums
//! - Crash recovery that keeps every complete write and drops every partial one
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Primitives (integer codes) / Dispatcher           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Namespace                             │
//! │   HandleRegistry (fd → file)   QuotaTracker (capacity)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Catalog   │          │  PageStore  │
//!   │ (name → fd) │          │ (block log) │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ checkpoint  │          │  Recovery   │
//!   │ (snapshot)  │          │  Scanner    │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod pagestore;
pub mod catalog;
pub mod registry;
pub mod quota;
pub mod namespace;
pub mod primitive;
pub mod dispatch;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NativeIoError, Result};
pub use config::{Config, SyncStrategy};
pub use namespace::{FileInfo, Namespace};
pub use pagestore::{RecoveryReport, RecoveryScanner};
pub use primitive::{Outcome, PrimitiveCall, Primitives};
pub use dispatch::{Dispatcher, Ticket};
pub use registry::Descriptor;
pub use quota::QuotaUsage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of NativeIO
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
