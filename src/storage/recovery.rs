//! # Startup Recovery and Checkpointing
//!
//! Recovery replays the WAL tail after the last checkpoint, rebuilding page
//! state that was logged but not yet flushed when the process died. Replay
//! is idempotent, so recovering twice (or crashing mid-recovery and
//! recovering again) converges to the same on-disk state:
//!
//! - INSERT records are skipped when the target slot already exists in the
//!   page's directory — live or tombstoned, either means the insert was
//!   already materialized (a tombstone additionally means a later DELETE
//!   hit it, and re-inserting would resurrect the row).
//! - UPDATE and DELETE records are skipped when `page.lsn >= record.lsn`,
//!   which covers crash-mid-flush: a page that already carries the change
//!   carries its LSN too.
//!
//! Per-record failures increment an error counter and recovery continues;
//! forward progress is preferred over giving up on the whole database.
//!
//! Checkpointing is the inverse contract: flush every dirty page, then
//! append a CHECKPOINT record, then fsync the WAL. After that sequence the
//! WAL prefix up to the checkpoint is dead weight and recovery may start
//! after it. There is no background thread; callers decide when to
//! checkpoint (the engine does it when the WAL passes a size threshold).

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{bail, Result};
use tracing::{debug, info, warn};

use super::pager::PageManager;
use super::wal::{Wal, WalRecord, WalRecordType};

/// Counters exposed after a recovery pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    pub records_processed: u64,
    pub records_applied: u64,
    pub records_skipped: u64,
    pub errors: u64,
    pub start_lsn: u64,
    pub end_lsn: u64,
}

impl RecoveryStats {
    /// True when every record replayed without error.
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

enum ApplyOutcome {
    Applied,
    Skipped,
}

pub struct RecoveryManager<'a> {
    wal: &'a Wal,
    pager: &'a PageManager,
}

impl<'a> RecoveryManager<'a> {
    pub fn new(wal: &'a Wal, pager: &'a PageManager) -> Self {
        Self { wal, pager }
    }

    /// Cheap predicate: are there records after the last checkpoint?
    pub fn needs_recovery(&self) -> Result<bool> {
        let checkpoint_lsn = self.wal.last_checkpoint_lsn();
        let records = self.wal.read_from(checkpoint_lsn.max(1))?;
        Ok(records.iter().any(|r| r.lsn > checkpoint_lsn))
    }

    /// Replays the WAL from the last checkpoint. Returns stats; the pass
    /// is clean iff `stats.errors == 0`.
    pub fn recover(&self) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats::default();
        let checkpoint_lsn = self.wal.last_checkpoint_lsn();
        stats.start_lsn = checkpoint_lsn.max(1);

        info!(start_lsn = stats.start_lsn, "starting recovery");

        let records = self.wal.read_from(stats.start_lsn)?;
        debug!(count = records.len(), "WAL records to replay");

        for record in &records {
            stats.records_processed += 1;
            stats.end_lsn = record.lsn;

            if record.record_type == WalRecordType::Checkpoint {
                stats.records_skipped += 1;
                continue;
            }

            match self.apply_record(record) {
                Ok(ApplyOutcome::Applied) => stats.records_applied += 1,
                Ok(ApplyOutcome::Skipped) => stats.records_skipped += 1,
                Err(e) => {
                    warn!(lsn = record.lsn, error = %e, "failed to apply WAL record");
                    stats.errors += 1;
                }
            }
        }

        info!(
            processed = stats.records_processed,
            applied = stats.records_applied,
            skipped = stats.records_skipped,
            errors = stats.errors,
            "recovery complete"
        );
        Ok(stats)
    }

    fn apply_record(&self, record: &WalRecord) -> Result<ApplyOutcome> {
        match record.record_type {
            WalRecordType::Insert => self.apply_insert(record),
            WalRecordType::Update => self.apply_update(record),
            WalRecordType::Delete => self.apply_delete(record),
            // Catalog changes are recovered from the catalog snapshot, and
            // transaction markers carry no page changes.
            WalRecordType::CreateTable
            | WalRecordType::DropTable
            | WalRecordType::Commit
            | WalRecordType::Rollback => Ok(ApplyOutcome::Skipped),
            WalRecordType::Checkpoint => Ok(ApplyOutcome::Skipped),
        }
    }

    fn apply_insert(&self, record: &WalRecord) -> Result<ApplyOutcome> {
        let mut guard = match self.pager.try_page(record.table_id, record.page_id)? {
            Some(guard) => guard,
            None => loop {
                // The page was never flushed; re-create it. Allocation is
                // sequential, so we allocate forward until the target id.
                let guard = self.pager.allocate_page(record.table_id)?;
                if guard.page_id() == record.page_id {
                    break guard;
                }
                if guard.page_id() > record.page_id {
                    bail!(
                        "page {} of table {} unreachable during recovery",
                        record.page_id,
                        record.table_id
                    );
                }
            },
        };

        if record.slot_id < guard.page().slot_count() {
            // Slot already materialized (live, or tombstoned by a later
            // DELETE); re-inserting would duplicate or resurrect the row.
            return Ok(ApplyOutcome::Skipped);
        }

        let page = guard.page_mut();
        let slot = page.insert_record(&record.payload)?;
        if slot != record.slot_id {
            warn!(
                lsn = record.lsn,
                expected = record.slot_id,
                actual = slot,
                "recovered insert landed in an unexpected slot"
            );
        }
        page.set_lsn(record.lsn);
        Ok(ApplyOutcome::Applied)
    }

    fn apply_update(&self, record: &WalRecord) -> Result<ApplyOutcome> {
        let Some(mut guard) = self.pager.try_page(record.table_id, record.page_id)? else {
            bail!(
                "page {} of table {} not found for update recovery",
                record.page_id,
                record.table_id
            );
        };

        if guard.page().lsn() >= record.lsn {
            return Ok(ApplyOutcome::Skipped);
        }

        let page = guard.page_mut();
        page.update_record(record.slot_id, &record.payload)?;
        page.set_lsn(record.lsn);
        Ok(ApplyOutcome::Applied)
    }

    fn apply_delete(&self, record: &WalRecord) -> Result<ApplyOutcome> {
        let Some(mut guard) = self.pager.try_page(record.table_id, record.page_id)? else {
            bail!(
                "page {} of table {} not found for delete recovery",
                record.page_id,
                record.table_id
            );
        };

        if guard.page().lsn() >= record.lsn {
            return Ok(ApplyOutcome::Skipped);
        }

        let page = guard.page_mut();
        if page.delete_record(record.slot_id).is_err() {
            // Already tombstoned.
            return Ok(ApplyOutcome::Skipped);
        }
        page.set_lsn(record.lsn);
        Ok(ApplyOutcome::Applied)
    }
}

pub struct CheckpointManager<'a> {
    wal: &'a Wal,
    pager: &'a PageManager,
    last_checkpoint_lsn: AtomicU64,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(wal: &'a Wal, pager: &'a PageManager) -> Self {
        Self {
            wal,
            pager,
            last_checkpoint_lsn: AtomicU64::new(wal.last_checkpoint_lsn()),
        }
    }

    /// Flush all dirty pages, append a CHECKPOINT record, fsync the WAL.
    pub fn checkpoint(&self) -> Result<u64> {
        let flushed = self.pager.flush_all()?;
        let lsn = self.wal.checkpoint()?;
        self.wal.sync()?;
        self.last_checkpoint_lsn.store(lsn, Ordering::Release);

        info!(flushed, lsn, "checkpoint complete");
        Ok(lsn)
    }

    pub fn last_checkpoint_lsn(&self) -> u64 {
        self.last_checkpoint_lsn.load(Ordering::Acquire)
    }

    /// Size heuristic; triggering is the caller's responsibility.
    pub fn should_checkpoint(&self, wal_size_threshold: u64) -> bool {
        self.wal
            .file_size()
            .map(|size| size > wal_size_threshold)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::WalRecord;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path) -> (Wal, PageManager) {
        let wal = Wal::open(dir.join("wal.log")).unwrap();
        let pager = PageManager::open(dir.join("data"), 64).unwrap();
        (wal, pager)
    }

    /// Logs `n` inserts into table 1 page 0 without applying them.
    fn log_inserts(wal: &Wal, n: u16) {
        for i in 0..n {
            let payload = format!("row-{}", i).into_bytes();
            wal.append(&WalRecord::insert(1, 0, i, payload)).unwrap();
        }
        wal.sync().unwrap();
    }

    #[test]
    fn recover_replays_unflushed_inserts() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());
        log_inserts(&wal, 3);

        let stats = RecoveryManager::new(&wal, &pager).recover().unwrap();
        assert!(stats.is_clean());
        assert_eq!(stats.records_applied, 3);

        let guard = pager.page(1, 0).unwrap();
        assert_eq!(guard.page().get_record(0).unwrap(), b"row-0");
        assert_eq!(guard.page().get_record(2).unwrap(), b"row-2");
        assert_eq!(guard.page().lsn(), 3);
    }

    #[test]
    fn recover_twice_is_a_no_op_the_second_time() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());
        log_inserts(&wal, 4);

        let first = RecoveryManager::new(&wal, &pager).recover().unwrap();
        assert_eq!(first.records_applied, 4);

        let second = RecoveryManager::new(&wal, &pager).recover().unwrap();
        assert!(second.is_clean());
        assert_eq!(second.records_applied, 0);
        assert_eq!(second.records_skipped, 4);

        let guard = pager.page(1, 0).unwrap();
        assert_eq!(guard.page().slot_count(), 4);
    }

    #[test]
    fn recovery_starts_after_the_last_checkpoint() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());

        // Row A is applied and checkpointed; row B is only logged.
        wal.append(&WalRecord::insert(1, 0, 0, b"A".to_vec())).unwrap();
        {
            let mut guard = pager.allocate_page(1).unwrap();
            let page = guard.page_mut();
            page.insert_record(b"A").unwrap();
            page.set_lsn(1);
        }
        let cp = CheckpointManager::new(&wal, &pager);
        cp.checkpoint().unwrap();

        wal.append(&WalRecord::insert(1, 0, 1, b"B".to_vec())).unwrap();
        wal.sync().unwrap();

        let rm = RecoveryManager::new(&wal, &pager);
        assert!(rm.needs_recovery().unwrap());
        let stats = rm.recover().unwrap();

        assert!(stats.is_clean());
        assert!(stats.records_applied >= 1);
        let guard = pager.page(1, 0).unwrap();
        assert_eq!(guard.page().get_record(0).unwrap(), b"A");
        assert_eq!(guard.page().get_record(1).unwrap(), b"B");
    }

    #[test]
    fn lsn_guard_skips_already_applied_updates() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());

        wal.append(&WalRecord::insert(1, 0, 0, b"aaaa".to_vec())).unwrap();
        wal.append(&WalRecord::update(1, 0, 0, b"bbbb".to_vec())).unwrap();
        wal.sync().unwrap();

        // Simulate the page already carrying both changes (flushed pre-crash).
        {
            let mut guard = pager.allocate_page(1).unwrap();
            let page = guard.page_mut();
            page.insert_record(b"bbbb").unwrap();
            page.set_lsn(2);
        }

        let stats = RecoveryManager::new(&wal, &pager).recover().unwrap();
        assert!(stats.is_clean());
        // Insert skipped (slot exists), update skipped (LSN guard).
        assert_eq!(stats.records_applied, 0);
        assert_eq!(stats.records_skipped, 2);

        let guard = pager.page(1, 0).unwrap();
        assert_eq!(guard.page().get_record(0).unwrap(), b"bbbb");
    }

    #[test]
    fn delete_replay_tombstones_the_slot() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());

        wal.append(&WalRecord::insert(1, 0, 0, b"gone".to_vec())).unwrap();
        wal.append(&WalRecord::delete(1, 0, 0)).unwrap();
        wal.sync().unwrap();

        let stats = RecoveryManager::new(&wal, &pager).recover().unwrap();
        assert!(stats.is_clean());
        assert_eq!(stats.records_applied, 2);

        let guard = pager.page(1, 0).unwrap();
        assert!(guard.page().get_record(0).is_err());
    }

    #[test]
    fn unknown_pages_in_non_insert_records_count_as_errors() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());

        wal.append(&WalRecord::update(9, 5, 0, b"x".to_vec())).unwrap();
        wal.append(&WalRecord::insert(1, 0, 0, b"ok".to_vec())).unwrap();
        wal.sync().unwrap();

        let stats = RecoveryManager::new(&wal, &pager).recover().unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.records_applied, 1);
        assert!(!stats.is_clean());

        // Recovery continued past the bad record.
        let guard = pager.page(1, 0).unwrap();
        assert_eq!(guard.page().get_record(0).unwrap(), b"ok");
    }

    #[test]
    fn needs_recovery_is_false_for_fresh_wal() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());
        assert!(!RecoveryManager::new(&wal, &pager).needs_recovery().unwrap());
    }

    #[test]
    fn needs_recovery_is_false_right_after_checkpoint() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());
        log_inserts(&wal, 2);
        RecoveryManager::new(&wal, &pager).recover().unwrap();
        CheckpointManager::new(&wal, &pager).checkpoint().unwrap();

        assert!(!RecoveryManager::new(&wal, &pager).needs_recovery().unwrap());
    }

    #[test]
    fn should_checkpoint_tracks_wal_size() {
        let dir = tempdir().unwrap();
        let (wal, pager) = setup(dir.path());
        let cp = CheckpointManager::new(&wal, &pager);

        assert!(!cp.should_checkpoint(1024));
        log_inserts(&wal, 40);
        assert!(cp.should_checkpoint(1024));
    }
}
