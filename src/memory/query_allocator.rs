//! # Budget-Enforcing Query Allocator
//!
//! Thin wrapper over an [`Arena`] that charges every allocation against a
//! per-query byte budget and fails fast once the budget is exhausted. The
//! budget check happens before the arena is touched, so a refused request
//! allocates nothing.
//!
//! Operators that materialize rows in ordinary containers (sort buffers,
//! aggregate state) account those bytes with [`QueryAllocator::charge`]
//! instead of routing every container through the arena; the enforcement
//! point is identical either way.

use std::cell::Cell;

use eyre::{bail, Result};

use super::Arena;

/// Error payload for an over-budget allocation. Carried inside
/// `eyre::Report` and recovered by downcast where the caller needs the
/// numbers rather than the message.
#[derive(Debug, Clone, Copy)]
pub struct AllocError {
    pub requested: usize,
    pub used: usize,
    pub limit: usize,
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "query memory budget exceeded: requested {} bytes with {} of {} already used",
            self.requested, self.used, self.limit
        )
    }
}

impl std::error::Error for AllocError {}

pub struct QueryAllocator<'a> {
    arena: &'a Arena,
    memory_limit: usize,
    bytes_used: Cell<usize>,
}

impl<'a> QueryAllocator<'a> {
    pub fn new(arena: &'a Arena, memory_limit: usize) -> Self {
        Self {
            arena,
            memory_limit,
            bytes_used: Cell::new(0),
        }
    }

    /// Allocates from the arena, charging the budget first.
    pub fn alloc(&self, size: usize, align: usize) -> Result<&'a mut [u8]> {
        self.charge(size)?;
        self.arena.alloc_bytes(size, align)
    }

    /// Copies `data` into the arena under the budget.
    pub fn alloc_copy(&self, data: &[u8]) -> Result<&'a mut [u8]> {
        self.charge(data.len())?;
        self.arena.alloc_slice_copy(data)
    }

    /// Accounts `size` bytes against the budget without arena-allocating.
    pub fn charge(&self, size: usize) -> Result<()> {
        let used = self.bytes_used.get();
        if used.saturating_add(size) > self.memory_limit {
            bail!(AllocError {
                requested: size,
                used,
                limit: self.memory_limit,
            });
        }
        self.bytes_used.set(used + size);
        Ok(())
    }

    /// Predicate operators use to peek before committing to work.
    pub fn would_exceed(&self, size: usize) -> bool {
        self.bytes_used.get().saturating_add(size) > self.memory_limit
    }

    /// Zeros the usage counter. The arena itself resets independently at
    /// query end.
    pub fn reset(&self) {
        self.bytes_used.set(0);
    }

    pub fn used(&self) -> usize {
        self.bytes_used.get()
    }

    pub fn limit(&self) -> usize {
        self.memory_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_within_budget_succeeds() {
        let arena = Arena::new();
        let alloc = QueryAllocator::new(&arena, 1024);

        let slice = alloc.alloc(512, 8).unwrap();
        assert_eq!(slice.len(), 512);
        assert_eq!(alloc.used(), 512);
    }

    #[test]
    fn alloc_over_budget_fails_before_touching_arena() {
        let arena = Arena::new();
        let alloc = QueryAllocator::new(&arena, 100);

        let err = alloc.alloc(101, 8).unwrap_err();
        let alloc_err = err.downcast_ref::<AllocError>().unwrap();
        assert_eq!(alloc_err.requested, 101);
        assert_eq!(alloc_err.used, 0);
        assert_eq!(alloc_err.limit, 100);
        assert_eq!(arena.bytes_allocated(), 0);
    }

    #[test]
    fn exact_budget_is_allowed() {
        let arena = Arena::new();
        let alloc = QueryAllocator::new(&arena, 100);

        assert!(alloc.alloc(100, 1).is_ok());
        assert!(alloc.alloc(1, 1).is_err());
    }

    #[test]
    fn would_exceed_peeks_without_charging() {
        let arena = Arena::new();
        let alloc = QueryAllocator::new(&arena, 100);
        alloc.charge(90).unwrap();

        assert!(alloc.would_exceed(11));
        assert!(!alloc.would_exceed(10));
        assert_eq!(alloc.used(), 90);
    }

    #[test]
    fn reset_zeros_usage() {
        let arena = Arena::new();
        let alloc = QueryAllocator::new(&arena, 100);
        alloc.charge(80).unwrap();

        alloc.reset();
        assert_eq!(alloc.used(), 0);
        assert!(alloc.charge(100).is_ok());
    }
}
