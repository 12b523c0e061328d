//! # Engine Façade
//!
//! Ties the storage, memory, execution and transaction subsystems into the
//! single surface the (external) adapters consume:
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                   Engine                   │
//! ├──────────┬──────────┬──────────┬───────────┤
//! │ Catalog  │ PageMgr  │   WAL    │ TxnMgr    │
//! ├──────────┴──────────┴──────────┴───────────┤
//! │  Executor (per query, budget-enforced)     │
//! └────────────────────────────────────────────┘
//! ```
//!
//! ## Open Sequence
//!
//! 1. Create the data directory and load the catalog snapshot if present.
//! 2. Open the WAL, validating its file header (corruption here is fatal).
//! 3. If records exist past the last checkpoint, run recovery and then
//!    checkpoint so the replayed state is durable in the data files.
//!
//! ## Query Admission
//!
//! `execute` reserves the query's full memory budget from the process-wide
//! tracker before starting; refusal is an immediate failure rather than a
//! mid-query OOM. Mutation plans take the write latch, everything else a
//! read latch, so one writer runs at a time and readers see the last
//! committed write.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::memory::{Arena, MemoryReservation, MemoryTracker, QueryAllocator};
use crate::schema::{persistence, Catalog};
use crate::shutdown::{ShutdownCoordinator, ShutdownPhase};
use crate::sql::{
    ExecutionContext, ExecutionResult, Executor, PlanNode, QueryBudget,
};
use crate::storage::{CheckpointManager, PageManager, RecoveryManager, RecoveryStats, Wal};
use crate::txn::TransactionManager;

const CATALOG_FILE_NAME: &str = "catalog.meta";
const WAL_FILE_NAME: &str = "wrendb.wal";

pub struct Engine {
    config: EngineConfig,
    catalog: Mutex<Catalog>,
    pager: PageManager,
    wal: Wal,
    txns: TransactionManager,
    tracker: Arc<MemoryTracker>,
    recovery: Option<RecoveryStats>,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).wrap_err_with(|| {
            format!("failed to create data directory {:?}", config.data_dir)
        })?;

        let catalog_path = config.data_dir.join(CATALOG_FILE_NAME);
        let catalog = if catalog_path.exists() {
            persistence::load(&catalog_path)
                .wrap_err("failed to load catalog snapshot")?
        } else {
            Catalog::new()
        };

        let pager = PageManager::open(&config.data_dir, config.max_cached_pages)?;
        let wal = Wal::open(config.data_dir.join(WAL_FILE_NAME))?;
        let tracker = Arc::new(MemoryTracker::with_limit(config.global_memory_limit));

        let mut engine = Self {
            config,
            catalog: Mutex::new(catalog),
            pager,
            wal,
            txns: TransactionManager::new(),
            tracker,
            recovery: None,
        };

        let recovery_manager = RecoveryManager::new(&engine.wal, &engine.pager);
        if recovery_manager.needs_recovery()? {
            let stats = recovery_manager.recover()?;
            info!(
                applied = stats.records_applied,
                errors = stats.errors,
                "recovery finished"
            );
            if stats.records_applied > 0 {
                // Make the replayed state durable so the next crash does
                // not replay the same tail again.
                CheckpointManager::new(&engine.wal, &engine.pager).checkpoint()?;
            }
            engine.recovery = Some(stats);
        }

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stats from the recovery pass performed at open, if one was needed.
    pub fn recovery_stats(&self) -> Option<&RecoveryStats> {
        self.recovery.as_ref()
    }

    pub fn needs_recovery(&self) -> Result<bool> {
        RecoveryManager::new(&self.wal, &self.pager).needs_recovery()
    }

    pub fn memory_tracker(&self) -> &Arc<MemoryTracker> {
        &self.tracker
    }

    pub fn catalog(&self) -> &Mutex<Catalog> {
        &self.catalog
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.txns
    }

    fn catalog_path(&self) -> PathBuf {
        self.config.data_dir.join(CATALOG_FILE_NAME)
    }

    /// Executes a plan under the default budget.
    pub fn execute(&self, plan: &PlanNode) -> ExecutionResult {
        self.execute_with_budget(plan, self.config.default_budget.clone())
    }

    /// Executes a plan under an explicit per-query budget.
    pub fn execute_with_budget(&self, plan: &PlanNode, budget: QueryBudget) -> ExecutionResult {
        // Admission control: hold the whole budget for the query's
        // lifetime so concurrent queries cannot overcommit the process.
        let Some(_reservation) = MemoryReservation::try_new(&self.tracker, budget.max_memory_bytes)
        else {
            return failure_result(format!(
                "insufficient memory headroom: {} bytes requested, {} in use of {}",
                budget.max_memory_bytes,
                self.tracker.used(),
                self.tracker.limit()
            ));
        };

        let is_mutation = plan.is_mutation();
        let txn = if is_mutation {
            self.txns.begin_write()
        } else {
            self.txns.begin_read()
        };
        debug!(txn = txn.id(), mutation = is_mutation, "executing plan");

        let arena = Arena::with_block_size(self.config.arena_block_size);
        let allocator = QueryAllocator::new(&arena, budget.max_memory_bytes);
        let mut ctx = ExecutionContext::new(budget, allocator);

        let executor = Executor::new(
            &self.pager,
            &self.catalog,
            &self.wal,
            self.config.wal_sync,
            self.catalog_path(),
        );
        let result = executor.execute(plan, &mut ctx);

        txn.commit();

        if is_mutation && result.success {
            let checkpointer = CheckpointManager::new(&self.wal, &self.pager);
            if checkpointer.should_checkpoint(self.config.checkpoint_threshold) {
                if let Err(e) = checkpointer.checkpoint() {
                    tracing::warn!(error = %e, "threshold checkpoint failed");
                }
            }
        }

        result
    }

    /// Flushes all dirty pages and marks the WAL position. Returns the
    /// checkpoint LSN.
    pub fn checkpoint(&self) -> Result<u64> {
        CheckpointManager::new(&self.wal, &self.pager).checkpoint()
    }

    /// Flushes everything without checkpointing (used at shutdown).
    pub fn flush(&self) -> Result<()> {
        self.pager.flush_all()?;
        self.wal.sync()
    }

    /// Wires this engine's resources into a shutdown coordinator.
    pub fn register_shutdown(self: &Arc<Self>, coordinator: &ShutdownCoordinator) {
        {
            let engine = Arc::clone(self);
            coordinator.register_callback(ShutdownPhase::FlushWal, move || {
                engine.checkpoint().map(|_| ())
            });
        }
        {
            let engine = Arc::clone(self);
            coordinator.register_callback(ShutdownPhase::CloseFiles, move || {
                engine.pager.close()
            });
        }
    }

    /// Convenience for embedded use without an external coordinator:
    /// checkpoint and close files within `timeout`.
    pub fn shutdown(self: &Arc<Self>, timeout: Duration) -> bool {
        let coordinator = ShutdownCoordinator::new();
        self.register_shutdown(&coordinator);
        coordinator.initiate(timeout)
    }
}

fn failure_result(message: String) -> ExecutionResult {
    ExecutionResult {
        success: false,
        error: Some(message),
        violation: None,
        column_names: Vec::new(),
        rows: Vec::new(),
        rows_affected: 0,
        stats: Default::default(),
    }
}
