//! Dispatch Module
//!
//! Queues primitive calls onto worker threads and hands back tickets.
//!
//! ## Architecture
//! ```text
//!  submit(call) ──▶ shard ──▶ ┌──────────┐    ┌──────────┐
//!                             │ channel 0│──▶ │ worker 0 │──▶ Namespace
//!                             ├──────────┤    ├──────────┤
//!                             │ channel N│──▶ │ worker N │──▶ Namespace
//!                             └──────────┘    └──────────┘
//!  ticket.wait() ◀──────────────── reply channel ◀──────────────┘
//! ```
//! - Descriptor calls are sharded by descriptor slot, name calls by name,
//!   so calls on one descriptor (or one name) run in submission order
//! - Every call still takes the per-file lock inside the namespace
//! - Enumeration goes to the next worker in turn

mod ticket;
mod worker;

pub use ticket::Ticket;
pub use worker::Dispatcher;
