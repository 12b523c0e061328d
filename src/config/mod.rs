//! # Engine Configuration
//!
//! Format constants live in [`constants`]; runtime knobs live in
//! [`EngineConfig`]. Import constants from here rather than redefining them
//! locally:
//!
//! ```ignore
//! use crate::config::{PAGE_SIZE, EngineConfig};
//! ```

mod constants;

pub use constants::*;

use std::path::PathBuf;
use std::time::Duration;

use crate::sql::QueryBudget;

/// Runtime configuration for an [`Engine`](crate::engine::Engine).
///
/// Built at startup by whatever outer layer owns configuration loading and
/// passed in by value. All fields have conservative defaults suitable for a
/// 512MB edge device.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding table files, the WAL and the catalog snapshot.
    pub data_dir: PathBuf,
    /// Maximum number of pages resident in the buffer pool.
    pub max_cached_pages: usize,
    /// Whether to fsync the WAL after every logged mutation.
    pub wal_sync: bool,
    /// Process-wide memory ceiling enforced by the memory tracker.
    pub global_memory_limit: usize,
    /// WAL size past which mutations trigger a checkpoint.
    pub checkpoint_threshold: u64,
    /// Budget applied to queries that do not carry an explicit override.
    pub default_budget: QueryBudget,
    /// Block size for per-query arenas.
    pub arena_block_size: usize,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_cached_pages: DEFAULT_BUFFER_POOL_PAGES,
            wal_sync: true,
            global_memory_limit: DEFAULT_GLOBAL_MEMORY_LIMIT,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            default_budget: QueryBudget::default(),
            arena_block_size: DEFAULT_ARENA_BLOCK_SIZE,
        }
    }

    pub fn max_cached_pages(mut self, pages: usize) -> Self {
        self.max_cached_pages = pages.max(1);
        self
    }

    pub fn wal_sync(mut self, sync: bool) -> Self {
        self.wal_sync = sync;
        self
    }

    pub fn global_memory_limit(mut self, limit: usize) -> Self {
        self.global_memory_limit = limit.max(MIN_GLOBAL_MEMORY_LIMIT);
        self
    }

    pub fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold = bytes;
        self
    }

    pub fn default_budget(mut self, budget: QueryBudget) -> Self {
        self.default_budget = budget;
        self
    }

    pub fn shutdown_timeout() -> Duration {
        Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS)
    }
}
