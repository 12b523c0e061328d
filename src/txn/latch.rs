//! # Writer-Preferring Reader-Writer Latch
//!
//! A reader-writer lock in which queued writers take priority over
//! arriving readers:
//!
//! - `lock_read` waits while a writer holds the latch *or any writer is
//!   waiting*, so a writer that has announced itself cannot be starved by
//!   a stream of new readers.
//! - `lock_write` announces itself (`waiting_writers += 1`), then waits
//!   for the latch to drain.
//! - `unlock_write` hands off to one waiting writer if there is one,
//!   otherwise wakes every reader.
//!
//! Built on `parking_lot`'s mutex + condvars rather than its `RwLock`
//! because the fairness policy here is part of the engine's contract and
//! must not depend on the lock vendor's policy.

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct LatchState {
    readers: u64,
    writer: bool,
    waiting_writers: u64,
}

pub struct RwLatch {
    state: Mutex<LatchState>,
    read_cv: Condvar,
    write_cv: Condvar,
}

impl RwLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::default()),
            read_cv: Condvar::new(),
            write_cv: Condvar::new(),
        }
    }

    pub fn lock_read(&self) {
        let mut state = self.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.read_cv.wait(&mut state);
        }
        state.readers += 1;
    }

    pub fn unlock_read(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0, "unlock_read without a reader");
        state.readers -= 1;
        if state.readers == 0 {
            self.write_cv.notify_one();
        }
    }

    pub fn lock_write(&self) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.readers > 0 || state.writer {
            self.write_cv.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
    }

    pub fn unlock_write(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.writer, "unlock_write without the writer");
        state.writer = false;
        if state.waiting_writers > 0 {
            self.write_cv.notify_one();
        } else {
            self.read_cv.notify_all();
        }
    }

    pub fn try_lock_read(&self) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        if state.writer || state.waiting_writers > 0 {
            return false;
        }
        state.readers += 1;
        true
    }

    pub fn try_lock_write(&self) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        if state.readers > 0 || state.writer {
            return false;
        }
        state.writer = true;
        true
    }
}

impl Default for RwLatch {
    fn default() -> Self {
        Self::new()
    }
}
