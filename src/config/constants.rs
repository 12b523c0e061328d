//! # Engine Configuration Constants
//!
//! This module centralizes the constants that define the on-disk format and
//! the default resource limits. Constants that depend on each other are
//! co-located and tied together with compile-time assertions so a change to
//! one cannot silently invalidate another.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (8192 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (24 bytes, fixed layout)
//!       │
//!       ├─> PAGE_USABLE_SIZE (derived: PAGE_SIZE - PAGE_HEADER_SIZE)
//!       │
//!       └─> buffer pool frame size (one frame = one page)
//!
//! WAL_RECORD_HEADER_SIZE (32 bytes)
//!       │
//!       └─> MAX_WAL_RECORD_SIZE bounds a single record (header + payload).
//!           The read path rejects any header whose length falls outside
//!           [WAL_RECORD_HEADER_SIZE, MAX_WAL_RECORD_SIZE] and treats it as
//!           end-of-valid-data.
//!
//! DEFAULT_QUERY_MEMORY_LIMIT (64 MiB)
//!       │
//!       └─> must not exceed DEFAULT_GLOBAL_MEMORY_LIMIT, or a single query
//!           could never reserve its headroom from the memory tracker
//! ```

// ============================================================================
// PAGE LAYOUT
// These define the fundamental page structure used throughout the engine
// ============================================================================

/// Size of each database page in bytes (8KB).
/// This is the fundamental unit of I/O and caching.
pub const PAGE_SIZE: usize = 8192;

/// Size of the page header in bytes.
/// Every page begins with this header containing magic, id, LSN and the
/// slot-directory bookkeeping fields.
pub const PAGE_HEADER_SIZE: usize = 24;

/// Size of one slot-directory entry in bytes (offset u16 + length u16).
pub const SLOT_ENTRY_SIZE: usize = 4;

/// Usable space in a page after the header.
pub const PAGE_USABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Page magic, "EDBG" interpreted as a little-endian u32.
pub const PAGE_MAGIC: u32 = 0x4544_4247;

const _: () = assert!(
    PAGE_USABLE_SIZE == PAGE_SIZE - PAGE_HEADER_SIZE,
    "PAGE_USABLE_SIZE derivation mismatch"
);

// ============================================================================
// WAL FORMAT
// ============================================================================

/// WAL file magic, "WALE" interpreted as a little-endian u32.
pub const WAL_MAGIC: u32 = 0x5741_4C45;

/// Current WAL file format version.
pub const WAL_VERSION: u32 = 1;

/// Size of the WAL file header in bytes.
pub const WAL_FILE_HEADER_SIZE: usize = 24;

/// Size of a WAL record header in bytes. Every record is this header
/// followed by `length - WAL_RECORD_HEADER_SIZE` payload bytes.
pub const WAL_RECORD_HEADER_SIZE: usize = 32;

/// Upper bound on a single WAL record (header + payload). A record payload
/// never exceeds one page plus slack for framing.
pub const MAX_WAL_RECORD_SIZE: usize = PAGE_SIZE + WAL_RECORD_HEADER_SIZE;

// ============================================================================
// BUFFER POOL
// ============================================================================

/// Default number of pages cached by the buffer pool (8MB at 8KB pages).
pub const DEFAULT_BUFFER_POOL_PAGES: usize = 1024;

// ============================================================================
// MEMORY LIMITS
// ============================================================================

/// Default block size for per-query arenas (64KB).
pub const DEFAULT_ARENA_BLOCK_SIZE: usize = 64 * 1024;

/// Default process-wide memory ceiling (512MB).
pub const DEFAULT_GLOBAL_MEMORY_LIMIT: usize = 512 * 1024 * 1024;

/// Minimum global memory limit. Even on the smallest targets the engine
/// needs this much headroom to admit a query.
pub const MIN_GLOBAL_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Fraction of system RAM claimed when the limit is auto-detected.
pub const AUTO_DETECT_BUDGET_PERCENT: usize = 25;

/// Default per-query memory budget (64MB).
pub const DEFAULT_QUERY_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

const _: () = assert!(
    DEFAULT_QUERY_MEMORY_LIMIT <= DEFAULT_GLOBAL_MEMORY_LIMIT,
    "a default query budget larger than the global limit could never be admitted"
);

// ============================================================================
// QUERY BUDGET DEFAULTS
// ============================================================================

/// Default per-query instruction cap.
pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 10_000_000;

/// Default per-query wall-clock cap in milliseconds.
pub const DEFAULT_MAX_QUERY_TIME_MS: u64 = 30_000;

/// Default per-query result-row cap.
pub const DEFAULT_MAX_RESULT_ROWS: u64 = 100_000;

// ============================================================================
// CHECKPOINT / SHUTDOWN
// ============================================================================

/// WAL size (bytes) past which a checkpoint is recommended.
pub const DEFAULT_CHECKPOINT_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Default bound on graceful shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
