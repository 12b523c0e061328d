//! # Per-Query Arena
//!
//! A bump-pointer arena for query-scoped scratch memory, built on
//! [`bumpalo::Bump`]. All allocations live until [`Arena::reset`], which is
//! O(1) and retains capacity so repeated queries amortize block allocation.
//!
//! ## Ownership
//!
//! The arena exclusively owns its blocks. `reset` invalidates every
//! outstanding reference, which the borrow checker enforces: `reset` takes
//! `&mut self` while all allocations borrow `&self`.
//!
//! ## Thread Safety
//!
//! Single-threaded by construction (`Bump` is `!Sync`); an arena belongs to
//! exactly one executing query.

use std::alloc::Layout;

use bumpalo::Bump;
use eyre::{ensure, Result};

use crate::config::DEFAULT_ARENA_BLOCK_SIZE;

pub struct Arena {
    bump: Bump,
    block_size: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_ARENA_BLOCK_SIZE)
    }

    /// Creates an arena whose first block is `block_size` bytes. Larger
    /// requests are served from dedicated oversized blocks.
    pub fn with_block_size(block_size: usize) -> Self {
        let block_size = block_size.max(64);
        Self {
            bump: Bump::with_capacity(block_size),
            block_size,
        }
    }

    /// Allocates `size` bytes with the given alignment. A zero-size request
    /// yields an empty slice without touching the arena.
    pub fn alloc_bytes(&self, size: usize, align: usize) -> Result<&mut [u8]> {
        if size == 0 {
            return Ok(&mut []);
        }
        let layout = Layout::from_size_align(size, align.max(1))
            .map_err(|e| eyre::eyre!("invalid arena layout ({} bytes, align {}): {}", size, align, e))?;
        let ptr = self.bump.alloc_layout(layout);
        // SAFETY: alloc_layout returns a pointer valid for `size` bytes with
        // the requested alignment, owned by the bump until reset. The &mut
        // borrow of the returned slice is tied to &self, and reset requires
        // &mut self, so no reference outlives the backing block.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), size) })
    }

    /// Allocates and zero-fills.
    pub fn alloc_zeroed(&self, size: usize, align: usize) -> Result<&mut [u8]> {
        let slice = self.alloc_bytes(size, align)?;
        slice.fill(0);
        Ok(slice)
    }

    /// Copies `data` into the arena.
    pub fn alloc_slice_copy(&self, data: &[u8]) -> Result<&mut [u8]> {
        ensure!(
            data.len() <= isize::MAX as usize,
            "arena copy of {} bytes exceeds addressable range",
            data.len()
        );
        let slice = self.alloc_bytes(data.len(), 1)?;
        slice.copy_from_slice(data);
        Ok(slice)
    }

    /// Rewinds the arena. All previously returned references are invalid
    /// (statically unreachable past this call); capacity is retained.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// Bytes the arena can hand out before growing again.
    pub fn remaining_capacity(&self) -> usize {
        self.bump.chunk_capacity()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
