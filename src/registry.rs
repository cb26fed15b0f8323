//! Handle Registry
//!
//! Issues and tracks open descriptors.
//!
//! ## Design
//! Descriptors live in an arena of slots. Each slot carries a generation
//! counter that is bumped when the slot is freed, so a descriptor whose slot
//! has since been reused can never be mistaken for the new session.
//!
//! ```text
//!  31  30                  16 15                   0
//! ┌───┬──────────────────────┬──────────────────────┐
//! │ 0 │ generation (15 bits) │    slot (16 bits)    │
//! └───┴──────────────────────┴──────────────────────┘
//! ```
//! The sign bit is always clear, so every descriptor is a non-negative i32.
//!
//! Generations never wrap. A slot whose generation is used up is retired
//! instead of freed, and the arena grows into a fresh slot. Once every slot
//! up to the handle limit is open or retired, `issue` reports `Busy`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::FileNode;
use crate::error::{NativeIoError, Result};

const SLOT_BITS: u32 = 16;
const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;
const GENERATION_MASK: u32 = (1 << 15) - 1;
/// Outside the 15-bit range, so no descriptor ever matches a retired slot
const RETIRED: u32 = GENERATION_MASK + 1;

/// An open session on a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(u32);

impl Descriptor {
    fn new(slot: usize, generation: u32) -> Self {
        Self(((generation & GENERATION_MASK) << SLOT_BITS) | (slot as u32 & SLOT_MASK))
    }

    /// Integer form handed to callers
    pub fn as_raw(&self) -> i32 {
        self.0 as i32
    }

    /// Parse a caller-supplied integer
    pub fn from_raw(raw: i32) -> Result<Self> {
        if raw < 0 {
            return Err(NativeIoError::InvalidArgument(format!(
                "descriptor {} is negative",
                raw
            )));
        }
        Ok(Self(raw as u32))
    }

    pub fn slot(&self) -> usize {
        (self.0 & SLOT_MASK) as usize
    }

    pub fn generation(&self) -> u32 {
        self.0 >> SLOT_BITS
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Arc<FileNode>>,
}

#[derive(Debug)]
struct Arena {
    slots: Vec<Slot>,
    /// Freed slots, reused oldest first so a just-closed slot rests longest
    free: VecDeque<usize>,
    open: usize,
    retired: usize,
}

/// Arena of open descriptors
pub struct HandleRegistry {
    arena: Mutex<Arena>,
    max_handles: usize,
}

impl HandleRegistry {
    pub fn new(max_handles: usize) -> Self {
        Self {
            arena: Mutex::new(Arena {
                slots: Vec::new(),
                free: VecDeque::new(),
                open: 0,
                retired: 0,
            }),
            max_handles: max_handles.min(SLOT_MASK as usize + 1),
        }
    }

    /// Bind a new descriptor to `node` and count it as an open handle
    pub fn issue(&self, node: Arc<FileNode>) -> Result<Descriptor> {
        let mut arena = self.arena.lock();

        let slot = match arena.free.pop_front() {
            Some(slot) => slot,
            None if arena.slots.len() < self.max_handles => {
                arena.slots.push(Slot {
                    generation: 1,
                    node: None,
                });
                arena.slots.len() - 1
            }
            None => {
                return Err(NativeIoError::Busy(format!(
                    "all {} descriptors are in use ({} retired)",
                    self.max_handles, arena.retired
                )))
            }
        };

        node.attach();
        let entry = &mut arena.slots[slot];
        entry.node = Some(node);
        let descriptor = Descriptor::new(slot, entry.generation);
        arena.open += 1;
        Ok(descriptor)
    }

    /// File behind an open descriptor
    pub fn resolve(&self, descriptor: Descriptor) -> Result<Arc<FileNode>> {
        let arena = self.arena.lock();
        let slot = arena
            .slots
            .get(descriptor.slot())
            .ok_or_else(|| NativeIoError::NotFound(format!("descriptor {}", descriptor)))?;

        match &slot.node {
            Some(node) if slot.generation == descriptor.generation() => Ok(Arc::clone(node)),
            _ => Err(NativeIoError::Closed(descriptor.as_raw())),
        }
    }

    /// Invalidate a descriptor and detach it from its file
    pub fn release(&self, descriptor: Descriptor) -> Result<Arc<FileNode>> {
        let mut arena = self.arena.lock();
        let index = descriptor.slot();
        let slot = arena
            .slots
            .get_mut(index)
            .ok_or_else(|| NativeIoError::NotFound(format!("descriptor {}", descriptor)))?;

        if slot.generation != descriptor.generation() {
            return Err(NativeIoError::Closed(descriptor.as_raw()));
        }

        let node = slot
            .node
            .take()
            .ok_or(NativeIoError::Closed(descriptor.as_raw()))?;
        node.detach();
        if slot.generation >= GENERATION_MASK {
            slot.generation = RETIRED;
            arena.retired += 1;
            tracing::debug!("Descriptor slot {} retired", index);
        } else {
            slot.generation += 1;
            arena.free.push_back(index);
        }
        arena.open -= 1;
        Ok(node)
    }

    /// Descriptors currently open
    pub fn open_count(&self) -> usize {
        self.arena.lock().open
    }

    pub fn capacity(&self) -> usize {
        self.max_handles
    }

    /// Slots whose generations are used up
    pub fn retired_count(&self) -> usize {
        self.arena.lock().retired
    }
}
