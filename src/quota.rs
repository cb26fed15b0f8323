//! Quota Tracker
//!
//! Accounts bytes consumed by the namespace against its capacity.
//!
//! Consumption is the sum of all file lengths plus a fixed footprint per
//! file. It is never persisted: recovery recomputes it from the committed
//! catalog, so the counter cannot drift from what the log says.
//!
//! ## Usage
//! ```text
//! let reservation = quota.try_reserve(growth)?;   // before the commit
//! store.commit_write(&mut entry, staged)?;        // may fail: reservation drops
//! reservation.commit();                           // keep the bytes
//! ```

use parking_lot::Mutex;

use crate::error::{NativeIoError, Result};

/// Snapshot of the namespace quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub capacity: u64,
    pub consumed: u64,
}

impl QuotaUsage {
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.consumed)
    }
}

/// Namespace-wide consumption counter
#[derive(Debug)]
pub struct QuotaTracker {
    capacity: u64,
    consumed: Mutex<u64>,
}

impl QuotaTracker {
    pub fn new(capacity: u64, consumed: u64) -> Self {
        Self {
            capacity,
            consumed: Mutex::new(consumed),
        }
    }

    /// Reserve `bytes`, returning whether they fit
    ///
    /// On failure nothing changes. Reserving nothing always succeeds, even
    /// when recovery left the namespace over capacity.
    pub fn reserve(&self, bytes: u64) -> bool {
        if bytes == 0 {
            return true;
        }
        let mut consumed = self.consumed.lock();
        match consumed.checked_add(bytes) {
            Some(total) if total <= self.capacity => {
                *consumed = total;
                true
            }
            _ => false,
        }
    }

    /// Reserve `bytes` behind a guard that gives them back unless committed
    pub fn try_reserve(&self, bytes: u64) -> Result<Reservation<'_>> {
        if self.reserve(bytes) {
            Ok(Reservation {
                tracker: self,
                bytes,
                committed: false,
            })
        } else {
            Err(NativeIoError::QuotaExceeded {
                requested: bytes,
                available: self.available(),
            })
        }
    }

    /// Give back `bytes` (delete, shrink)
    pub fn release(&self, bytes: u64) {
        let mut consumed = self.consumed.lock();
        *consumed = consumed.saturating_sub(bytes);
    }

    pub fn usage(&self) -> QuotaUsage {
        QuotaUsage {
            capacity: self.capacity,
            consumed: *self.consumed.lock(),
        }
    }

    pub fn available(&self) -> u64 {
        self.usage().available()
    }
}

/// Bytes held against the quota while a commit is in flight
#[must_use = "a reservation is released as soon as it is dropped"]
pub struct Reservation<'a> {
    tracker: &'a QuotaTracker,
    bytes: u64,
    committed: bool,
}

impl Reservation<'_> {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Keep the reserved bytes; call once the commit is durable
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed && self.bytes > 0 {
            self.tracker.release(self.bytes);
        }
    }
}
