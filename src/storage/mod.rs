//! # Storage Layer
//!
//! The deterministic storage substrate: slotted pages, a bounded buffer
//! pool with dirty write-back, a CRC-protected write-ahead log, and the
//! recovery/checkpoint machinery that ties them together.
//!
//! ## Ordering Contract
//!
//! Two rules connect the pieces; everything else follows from them:
//!
//! 1. **WAL before page** — a page mutation is durable only once its WAL
//!    record is appended *and* synced. Any page state that survives a crash
//!    is therefore at or behind the last durable WAL record.
//! 2. **LSN monotonicity** — the WAL assigns strictly increasing LSNs, and
//!    a page's header LSN only moves forward. Recovery uses the pair to
//!    decide what still needs applying.
//!
//! ## Module Organization
//!
//! - [`page`]: 8KB slotted page with header, slot directory and tombstones
//! - [`record`]: self-describing row codec stored inside pages
//! - [`pager`]: buffer pool, per-table files, LRU eviction, write-back
//! - [`wal`]: append-only log with CRC-checked records
//! - [`recovery`]: idempotent replay and checkpointing

pub mod page;
pub mod pager;
pub mod record;
pub mod recovery;
pub mod wal;

pub use page::{Page, PageHeader, SlotEntry, FLAG_DIRTY, FLAG_INTERNAL, FLAG_LEAF, FLAG_NONE, FLAG_OVERFLOW};
pub use pager::{PageGuard, PageKey, PageManager};
pub use record::{Record, RecordHeader, RowId, RECORD_HEADER_SIZE};
pub use recovery::{CheckpointManager, RecoveryManager, RecoveryStats};
pub use wal::{Wal, WalFileHeader, WalRecord, WalRecordHeader, WalRecordType};
