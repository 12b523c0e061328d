//! # Memory Management
//!
//! Three layers with distinct jobs:
//!
//! ```text
//! +-----------------------------------------------------------+
//! |  MemoryTracker (process-wide, lock-free)                  |
//! |  caps aggregate headroom across all queries               |
//! +-----------------------------------------------------------+
//! |  QueryAllocator (per query)                               |
//! |  hard byte budget, fails fast before allocating           |
//! +-----------------------------------------------------------+
//! |  Arena (per query, bump-pointer)                          |
//! |  O(1) reset, capacity reuse across queries                |
//! +-----------------------------------------------------------+
//! ```
//!
//! The engine reserves a query's full budget from the tracker before
//! admitting it, so the sum of admitted budgets never exceeds the process
//! ceiling even if every query uses its budget to the last byte.

mod arena;
mod query_allocator;
mod tracker;

pub use arena::Arena;
pub use query_allocator::{AllocError, QueryAllocator};
pub use tracker::{MemoryReservation, MemoryTracker, TrackerStats};
