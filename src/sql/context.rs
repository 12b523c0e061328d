//! # Execution Context and Query Budget
//!
//! Every query runs under an [`ExecutionContext`] that owns the per-query
//! allocator and the live counters, and enforces the [`QueryBudget`] caps.
//! Operators call [`ExecutionContext::check_budget`] at least once per
//! produced row; a violation is an ordinary error value (a [`BudgetError`]
//! inside `eyre::Report`), never a panic — operators return it upward and
//! the executor turns it into a failed [`ExecutionResult`]
//! (`crate::sql::ExecutionResult`).
//!
//! Cancellation is cooperative: [`AbortHandle::abort`] flips a shared flag
//! that the next `check_budget` or `should_stop` observes. There is no
//! forced preemption, so a query can overshoot its caps by at most one
//! operator step.
//!
//! The context is intentionally not `Sync`; it belongs to the one thread
//! executing the query. Only the abort flag is shared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{bail, Result};

use crate::config::{
    DEFAULT_MAX_INSTRUCTIONS, DEFAULT_MAX_QUERY_TIME_MS, DEFAULT_MAX_RESULT_ROWS,
    DEFAULT_QUERY_MEMORY_LIMIT,
};
use crate::memory::QueryAllocator;

/// Hard per-query caps. Every field is enforced individually.
#[derive(Debug, Clone)]
pub struct QueryBudget {
    pub max_memory_bytes: usize,
    pub max_instructions: u64,
    pub max_time: Duration,
    pub max_result_rows: u64,
}

impl Default for QueryBudget {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_QUERY_MEMORY_LIMIT,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            max_time: Duration::from_millis(DEFAULT_MAX_QUERY_TIME_MS),
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
        }
    }
}

/// Live counters exposed on the result.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub instructions_executed: u64,
    pub rows_scanned: u64,
    pub rows_returned: u64,
    pub memory_used: usize,
    pub elapsed: Duration,
}

/// Which cap a query tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetViolation {
    MemoryExceeded,
    InstructionsExceeded,
    Timeout,
    RowsExceeded,
    Aborted,
}

impl BudgetViolation {
    pub fn as_str(self) -> &'static str {
        match self {
            BudgetViolation::MemoryExceeded => "memory_exceeded",
            BudgetViolation::InstructionsExceeded => "instructions_exceeded",
            BudgetViolation::Timeout => "timeout",
            BudgetViolation::RowsExceeded => "rows_exceeded",
            BudgetViolation::Aborted => "aborted",
        }
    }
}

/// Error payload for a budget violation. Surfaced to the outer layer as a
/// 429-class error; recovered from `eyre::Report` by downcast.
#[derive(Debug, Clone)]
pub struct BudgetError {
    pub violation: BudgetViolation,
    pub message: String,
}

impl std::fmt::Display for BudgetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BudgetError {}

/// Shared flag for cooperative cross-thread cancellation.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

pub struct ExecutionContext<'a> {
    budget: QueryBudget,
    allocator: QueryAllocator<'a>,
    stats: ExecutionStats,
    start_time: Option<Instant>,
    started: bool,
    aborted: Arc<AtomicBool>,
    violation: Option<BudgetViolation>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(budget: QueryBudget, allocator: QueryAllocator<'a>) -> Self {
        Self {
            budget,
            allocator,
            stats: ExecutionStats::default(),
            start_time: None,
            started: false,
            aborted: Arc::new(AtomicBool::new(false)),
            violation: None,
        }
    }

    /// Stamps the start time; the wall-clock cap measures from here.
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        self.started = true;
    }

    pub fn budget(&self) -> &QueryBudget {
        &self.budget
    }

    pub fn allocator(&self) -> &QueryAllocator<'a> {
        &self.allocator
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: Arc::clone(&self.aborted),
        }
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn violation(&self) -> Option<BudgetViolation> {
        self.violation
    }

    pub fn record_instructions(&mut self, count: u64) {
        self.stats.instructions_executed += count;
    }

    pub fn record_row_scanned(&mut self) {
        self.stats.rows_scanned += 1;
    }

    pub fn record_row_returned(&mut self) {
        self.stats.rows_returned += 1;
    }

    fn elapsed(&self) -> Duration {
        self.start_time
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Evaluates the caps in a fixed order (abort, time, instructions,
    /// rows, memory) and fails with a [`BudgetError`] on the first hit.
    pub fn check_budget(&mut self) -> Result<()> {
        if self.is_aborted() {
            return self.violate(BudgetViolation::Aborted, "Query aborted".to_string());
        }

        let elapsed = self.elapsed();
        if self.started && elapsed > self.budget.max_time {
            return self.violate(
                BudgetViolation::Timeout,
                format!(
                    "Query timeout: ran {:?}, budget {:?}",
                    elapsed, self.budget.max_time
                ),
            );
        }

        if self.stats.instructions_executed >= self.budget.max_instructions {
            return self.violate(
                BudgetViolation::InstructionsExceeded,
                format!(
                    "Instruction limit exceeded: {} of {}",
                    self.stats.instructions_executed, self.budget.max_instructions
                ),
            );
        }

        if self.stats.rows_returned >= self.budget.max_result_rows {
            return self.violate(
                BudgetViolation::RowsExceeded,
                format!(
                    "Result row limit exceeded: {} of {}",
                    self.stats.rows_returned, self.budget.max_result_rows
                ),
            );
        }

        if self.allocator.used() >= self.budget.max_memory_bytes {
            return self.violate(
                BudgetViolation::MemoryExceeded,
                format!(
                    "Memory limit exceeded: {} of {} bytes",
                    self.allocator.used(),
                    self.budget.max_memory_bytes
                ),
            );
        }

        Ok(())
    }

    fn violate(&mut self, violation: BudgetViolation, message: String) -> Result<()> {
        self.violation = Some(violation);
        self.stats.elapsed = self.elapsed();
        bail!(BudgetError { violation, message })
    }

    /// Cheap, non-erroring variant for tight loops.
    pub fn should_stop(&self) -> bool {
        if self.is_aborted() {
            return true;
        }
        if self.started && self.elapsed() > self.budget.max_time {
            return true;
        }
        self.stats.instructions_executed >= self.budget.max_instructions
            || self.stats.rows_returned >= self.budget.max_result_rows
            || self.allocator.used() >= self.budget.max_memory_bytes
    }

    /// Stamps final elapsed time and memory usage.
    pub fn finalize(&mut self) {
        self.stats.elapsed = self.elapsed();
        self.stats.memory_used = self.allocator.used();
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Arena;

    fn context<'a>(arena: &'a Arena, budget: QueryBudget) -> ExecutionContext<'a> {
        let limit = budget.max_memory_bytes;
        ExecutionContext::new(budget, QueryAllocator::new(arena, limit))
    }

    #[test]
    fn fresh_context_passes_budget_check() {
        let arena = Arena::new();
        let mut ctx = context(&arena, QueryBudget::default());
        ctx.start();
        assert!(ctx.check_budget().is_ok());
        assert!(!ctx.should_stop());
    }

    #[test]
    fn instruction_cap_trips() {
        let arena = Arena::new();
        let budget = QueryBudget {
            max_instructions: 100,
            ..QueryBudget::default()
        };
        let mut ctx = context(&arena, budget);
        ctx.start();

        ctx.record_instructions(99);
        assert!(ctx.check_budget().is_ok());

        ctx.record_instructions(1);
        let err = ctx.check_budget().unwrap_err();
        let budget_err = err.downcast_ref::<BudgetError>().unwrap();
        assert_eq!(budget_err.violation, BudgetViolation::InstructionsExceeded);
        assert_eq!(ctx.violation(), Some(BudgetViolation::InstructionsExceeded));
        assert!(ctx.should_stop());
    }

    #[test]
    fn row_cap_trips() {
        let arena = Arena::new();
        let budget = QueryBudget {
            max_result_rows: 2,
            ..QueryBudget::default()
        };
        let mut ctx = context(&arena, budget);
        ctx.start();

        ctx.record_row_returned();
        assert!(ctx.check_budget().is_ok());
        ctx.record_row_returned();

        let err = ctx.check_budget().unwrap_err();
        let budget_err = err.downcast_ref::<BudgetError>().unwrap();
        assert_eq!(budget_err.violation, BudgetViolation::RowsExceeded);
    }

    #[test]
    fn timeout_trips_and_message_names_it() {
        let arena = Arena::new();
        let budget = QueryBudget {
            max_time: Duration::from_millis(1),
            ..QueryBudget::default()
        };
        let mut ctx = context(&arena, budget);
        ctx.start();
        std::thread::sleep(Duration::from_millis(5));

        let err = ctx.check_budget().unwrap_err();
        let budget_err = err.downcast_ref::<BudgetError>().unwrap();
        assert_eq!(budget_err.violation, BudgetViolation::Timeout);
        assert!(budget_err.message.contains("Query timeout"));
        assert!(ctx.stats().elapsed >= Duration::from_millis(1));
    }

    #[test]
    fn memory_cap_trips_via_allocator_usage() {
        let arena = Arena::new();
        let budget = QueryBudget {
            max_memory_bytes: 1024,
            ..QueryBudget::default()
        };
        let mut ctx = context(&arena, budget);
        ctx.start();

        ctx.allocator().charge(1024).unwrap();
        let err = ctx.check_budget().unwrap_err();
        let budget_err = err.downcast_ref::<BudgetError>().unwrap();
        assert_eq!(budget_err.violation, BudgetViolation::MemoryExceeded);
    }

    #[test]
    fn abort_wins_over_everything() {
        let arena = Arena::new();
        let mut ctx = context(&arena, QueryBudget::default());
        ctx.start();

        let handle = ctx.abort_handle();
        handle.abort();

        let err = ctx.check_budget().unwrap_err();
        let budget_err = err.downcast_ref::<BudgetError>().unwrap();
        assert_eq!(budget_err.violation, BudgetViolation::Aborted);
        assert!(ctx.should_stop());
    }

    #[test]
    fn abort_handle_works_from_another_thread() {
        let arena = Arena::new();
        let mut ctx = context(&arena, QueryBudget::default());
        ctx.start();

        let handle = ctx.abort_handle();
        std::thread::spawn(move || handle.abort())
            .join()
            .unwrap();

        assert!(ctx.check_budget().is_err());
    }

    #[test]
    fn finalize_stamps_stats() {
        let arena = Arena::new();
        let mut ctx = context(&arena, QueryBudget::default());
        ctx.start();
        ctx.allocator().charge(512).unwrap();
        ctx.finalize();

        assert_eq!(ctx.stats().memory_used, 512);
    }
}
