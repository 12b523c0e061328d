//! # Process-Wide Memory Tracker
//!
//! Tracks aggregate memory reservations across all queries and refuses
//! reservations that would push the process past its configured ceiling.
//! Independent of per-query allocation: the tracker caps total headroom,
//! the [`QueryAllocator`](super::QueryAllocator) caps one query.
//!
//! All counters are lock-free. Admission uses a CAS loop on `used` so a
//! reservation is atomic with respect to concurrent reservations; `peak`
//! is raised monotonically with its own CAS loop.
//!
//! Constructed once at startup and shared by `Arc`; there is deliberately
//! no global instance.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use sysinfo::System;

use crate::config::{AUTO_DETECT_BUDGET_PERCENT, DEFAULT_GLOBAL_MEMORY_LIMIT, MIN_GLOBAL_MEMORY_LIMIT};

#[derive(Debug)]
pub struct MemoryTracker {
    limit: AtomicUsize,
    used: AtomicUsize,
    peak: AtomicUsize,
    allocation_count: AtomicU64,
    failed_count: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerStats {
    pub limit: usize,
    pub used: usize,
    pub peak: usize,
    pub allocation_count: u64,
    pub failed_count: u64,
}

impl MemoryTracker {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit.max(MIN_GLOBAL_MEMORY_LIMIT)),
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            allocation_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
        }
    }

    /// Sizes the limit from system RAM (25%, floored), falling back to the
    /// default when the probe reports nothing useful.
    pub fn auto_detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory() as usize;

        let limit = if total == 0 {
            DEFAULT_GLOBAL_MEMORY_LIMIT
        } else {
            (total * AUTO_DETECT_BUDGET_PERCENT) / 100
        };

        Self::with_limit(limit)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit
            .store(limit.max(MIN_GLOBAL_MEMORY_LIMIT), Ordering::Release);
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn would_exceed(&self, size: usize) -> bool {
        self.used().saturating_add(size) > self.limit()
    }

    /// Atomically admits or refuses a reservation of `size` bytes.
    pub fn try_reserve(&self, size: usize) -> bool {
        let limit = self.limit();

        loop {
            let current = self.used.load(Ordering::Acquire);
            let new_used = match current.checked_add(size) {
                Some(v) if v <= limit => v,
                _ => {
                    self.failed_count.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            };

            match self.used.compare_exchange_weak(
                current,
                new_used,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.allocation_count.fetch_add(1, Ordering::Relaxed);
                    self.raise_peak(new_used);
                    return true;
                }
                Err(_) => continue,
            }
        }
    }

    /// Releases a prior reservation, clamped at zero.
    pub fn release(&self, size: usize) {
        loop {
            let current = self.used.load(Ordering::Acquire);
            let new_used = current.saturating_sub(size);

            match self.used.compare_exchange_weak(
                current,
                new_used,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(_) => continue,
            }
        }
    }

    fn raise_peak(&self, candidate: usize) {
        loop {
            let peak = self.peak.load(Ordering::Acquire);
            if candidate <= peak {
                return;
            }
            match self.peak.compare_exchange_weak(
                peak,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(_) => continue,
            }
        }
    }

    pub fn reset_stats(&self) {
        self.peak.store(self.used(), Ordering::Release);
        self.allocation_count.store(0, Ordering::Release);
        self.failed_count.store(0, Ordering::Release);
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            limit: self.limit(),
            used: self.used(),
            peak: self.peak(),
            allocation_count: self.allocation_count.load(Ordering::Acquire),
            failed_count: self.failed_count.load(Ordering::Acquire),
        }
    }
}

/// RAII reservation: takes on construction, releases on drop.
#[derive(Debug)]
pub struct MemoryReservation<'t> {
    tracker: &'t MemoryTracker,
    size: usize,
}

impl<'t> MemoryReservation<'t> {
    /// Attempts the reservation; `None` when the tracker refuses.
    pub fn try_new(tracker: &'t MemoryTracker, size: usize) -> Option<Self> {
        if tracker.try_reserve(size) {
            Some(Self { tracker, size })
        } else {
            None
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Releases early; further drops are no-ops.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.size > 0 {
            self.tracker.release(self.size);
            self.size = 0;
        }
    }
}

impl Drop for MemoryReservation<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
