//! # Transaction Coordinator
//!
//! Single-writer / multi-reader transactions over the engine-wide
//! [`RwLatch`]. A write transaction holds the engine exclusively; readers
//! share it and observe the last committed write.
//!
//! ## Transaction States
//!
//! ```text
//! ┌─────────┐     commit()     ┌───────────┐
//! │ Active  │ ───────────────> │ Committed │
//! └─────────┘                  └───────────┘
//!      │
//!      │ abort() / drop
//!      v
//! ┌─────────┐
//! │ Aborted │
//! └─────────┘
//! ```
//!
//! Handles are uniquely owned; dropping an Active handle aborts it, so a
//! panicking query can never leak the write latch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::latch::RwLatch;

pub type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

pub struct TransactionManager {
    latch: RwLatch,
    next_id: AtomicU64,
    active_count: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            latch: RwLatch::new(),
            next_id: AtomicU64::new(1),
            active_count: AtomicU64::new(0),
        }
    }

    /// Begins a read-only transaction; blocks while a writer is active or
    /// queued.
    pub fn begin_read(&self) -> Transaction<'_> {
        self.latch.lock_read();
        self.make_txn(true)
    }

    /// Begins the write transaction; blocks until exclusive.
    pub fn begin_write(&self) -> Transaction<'_> {
        self.latch.lock_write();
        self.make_txn(false)
    }

    /// Non-blocking write attempt.
    pub fn try_begin_write(&self) -> Option<Transaction<'_>> {
        if self.latch.try_lock_write() {
            Some(self.make_txn(false))
        } else {
            None
        }
    }

    fn make_txn(&self, read_only: bool) -> Transaction<'_> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.active_count.fetch_add(1, Ordering::SeqCst);
        Transaction {
            id,
            read_only,
            state: TxnState::Active,
            start_time: Instant::now(),
            manager: self,
            finished: false,
        }
    }

    pub fn active_transactions(&self) -> u64 {
        self.active_count.load(Ordering::Acquire)
    }

    pub fn next_id(&self) -> TxnId {
        self.next_id.load(Ordering::Acquire)
    }

    fn end(&self, read_only: bool) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        if read_only {
            self.latch.unlock_read();
        } else {
            self.latch.unlock_write();
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Uniquely-owned transaction handle. Holds its latch mode until
/// committed, aborted or dropped.
pub struct Transaction<'a> {
    id: TxnId,
    read_only: bool,
    state: TxnState,
    start_time: Instant,
    manager: &'a TransactionManager,
    finished: bool,
}

impl Transaction<'_> {
    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn commit(mut self) {
        self.state = TxnState::Committed;
        self.finished = true;
        self.manager.end(self.read_only);
    }

    pub fn abort(mut self) {
        self.state = TxnState::Aborted;
        self.finished = true;
        self.manager.end(self.read_only);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state = TxnState::Aborted;
            self.manager.end(self.read_only);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn ids_are_monotone() {
        let mgr = TransactionManager::new();
        let a = mgr.begin_read();
        let a_id = a.id();
        a.commit();
        let b = mgr.begin_write();
        assert!(b.id() > a_id);
        b.commit();
    }

    #[test]
    fn commit_and_abort_flip_state_and_release() {
        let mgr = TransactionManager::new();

        let txn = mgr.begin_write();
        assert_eq!(txn.state(), TxnState::Active);
        assert!(!txn.is_read_only());
        assert_eq!(mgr.active_transactions(), 1);
        txn.commit();
        assert_eq!(mgr.active_transactions(), 0);

        let txn = mgr.begin_write();
        txn.abort();
        assert_eq!(mgr.active_transactions(), 0);

        // The latch is free again.
        assert!(mgr.try_begin_write().is_some());
    }

    #[test]
    fn dropping_an_active_transaction_aborts_it() {
        let mgr = TransactionManager::new();
        {
            let _txn = mgr.begin_write();
            assert!(mgr.try_begin_write().is_none());
        }
        assert_eq!(mgr.active_transactions(), 0);
        assert!(mgr.try_begin_write().is_some());
    }

    #[test]
    fn readers_share_writers_exclude() {
        let mgr = TransactionManager::new();

        let r1 = mgr.begin_read();
        let r2 = mgr.begin_read();
        assert_eq!(mgr.active_transactions(), 2);
        assert!(mgr.try_begin_write().is_none());

        r1.commit();
        r2.commit();
        let w = mgr.try_begin_write().expect("latch drained");
        w.commit();
    }

    #[test]
    fn at_most_one_writer_is_ever_active() {
        let mgr = Arc::new(TransactionManager::new());
        let writer_active = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                let writer_active = Arc::clone(&writer_active);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let txn = mgr.begin_write();
                        assert!(
                            !writer_active.swap(true, Ordering::SeqCst),
                            "two writers active at once"
                        );
                        writer_active.store(false, Ordering::SeqCst);
                        txn.commit();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
