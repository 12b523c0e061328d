//! # Pull-Based Query Executor
//!
//! Volcano-model execution: each physical operator implements [`Operator`]
//! (`open` / `next` / `close`) and rows are pulled through the tree on
//! demand. Every operator threads the [`ExecutionContext`] through each
//! call so the per-query budget is consulted at operator granularity.
//!
//! ```text
//! LimitOp
//!     └── SortOp
//!             └── FilterOp
//!                     └── TableScanOp
//!                             └── [buffer pool]
//! ```
//!
//! ## Budget Discipline
//!
//! - TableScan records ~5 instructions per row, 10 per page advance and
//!   10 for open; Filter adds 5 per evaluated row; Sort charges its
//!   materialized bytes to the query allocator and checks the budget on
//!   every buffered row.
//! - The executor's drive loop checks the budget once per collected row
//!   and counts returned rows, so `max_result_rows` binds for every plan
//!   shape, with or without a Limit operator.
//! - A violation surfaces as a failed [`ExecutionResult`] carrying the
//!   violation tag; partial rows are discarded, the process carries on.
//!
//! ## DDL / DML
//!
//! INSERT, CREATE TABLE and DROP TABLE bypass the operator tree and talk
//! to the catalog, pager and WAL directly. The insert path follows the
//! write protocol: WAL append (and fsync, per configuration) strictly
//! before the page mutation, with the slot index predicted under the
//! single-writer lock so recovery can replay idempotently.

use std::path::PathBuf;

use eyre::{bail, ensure, Result};
use hashbrown::HashSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::debug;

use crate::memory::AllocError;
use crate::schema::{Catalog, ColumnDef, TableDef};
use crate::storage::{PageManager, Record, RowId, Wal, WalRecord};
use crate::types::{DataType, Value};

use super::ast::{AggregateFunc, Expr};
use super::context::{BudgetError, BudgetViolation, ExecutionContext, ExecutionStats};
use super::expr;
use super::plan::{AggregateExpr, ColumnSpec, PlanNode};

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    fn approx_size(&self) -> usize {
        std::mem::size_of::<Row>() + self.values.iter().map(Value::approx_size).sum::<usize>()
    }
}

/// Outcome of [`Executor::execute`].
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    pub violation: Option<BudgetViolation>,
    pub column_names: Vec<String>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    pub stats: ExecutionStats,
}

impl ExecutionResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
            violation: None,
            column_names: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            stats: ExecutionStats::default(),
        }
    }

    fn failure(message: String, violation: Option<BudgetViolation>) -> Self {
        Self {
            success: false,
            error: Some(message),
            violation,
            column_names: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            stats: ExecutionStats::default(),
        }
    }
}

/// Pull-based operator interface.
pub trait Operator {
    fn open(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()>;
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>>;
    fn close(&mut self);
    fn column_names(&self) -> &[String];
}

// ---------------------------------------------------------------------------
// TableScan
// ---------------------------------------------------------------------------

struct TableScanOp<'e> {
    pager: &'e PageManager,
    table: TableDef,
    columns: Vec<String>,
    current_page: u32,
    current_slot: u16,
    exhausted: bool,
}

impl<'e> TableScanOp<'e> {
    fn new(pager: &'e PageManager, table: TableDef) -> Self {
        let columns = table.column_names();
        Self {
            pager,
            table,
            columns,
            current_page: 0,
            current_slot: 0,
            exhausted: false,
        }
    }
}

impl Operator for TableScanOp<'_> {
    fn open(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.current_page = 0;
        self.current_slot = 0;
        self.exhausted = false;
        ctx.record_instructions(10);
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        ctx.record_instructions(1);

        while !self.exhausted {
            ctx.check_budget()?;

            let row = {
                let Some(guard) = self.pager.try_page(self.table.id, self.current_page)? else {
                    self.exhausted = true;
                    break;
                };
                let page = guard.page();

                let mut found = None;
                while self.current_slot < page.slot_count() {
                    let slot = self.current_slot;
                    self.current_slot += 1;

                    if !page.is_live(slot) {
                        continue;
                    }
                    let bytes = page.get_record(slot)?;
                    let record = Record::deserialize(bytes)?;
                    ensure!(
                        record.column_count() == self.table.columns.len(),
                        "row in table '{}' has {} columns, schema has {}",
                        self.table.name,
                        record.column_count(),
                        self.table.columns.len()
                    );
                    found = Some(Row::new(record.into_values()));
                    break;
                }
                found
            };

            match row {
                Some(row) => {
                    ctx.record_row_scanned();
                    ctx.record_instructions(5);
                    return Ok(Some(row));
                }
                None => {
                    self.current_page += 1;
                    self.current_slot = 0;
                    ctx.record_instructions(10);
                }
            }
        }

        Ok(None)
    }

    fn close(&mut self) {
        self.exhausted = true;
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

struct FilterOp<'e> {
    child: Box<dyn Operator + 'e>,
    predicate: Expr,
    columns: Vec<String>,
}

impl Operator for FilterOp<'_> {
    fn open(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        while let Some(row) = self.child.next(ctx)? {
            ctx.record_instructions(5);
            if expr::eval_predicate(&self.predicate, &row.values, &self.columns)? == Some(true) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.child.close();
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

struct ProjectOp<'e> {
    child: Box<dyn Operator + 'e>,
    exprs: Vec<Expr>,
    input_columns: Vec<String>,
    output_columns: Vec<String>,
}

impl Operator for ProjectOp<'_> {
    fn open(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        let Some(row) = self.child.next(ctx)? else {
            return Ok(None);
        };
        ctx.record_instructions(self.exprs.len() as u64);

        let mut values = Vec::with_capacity(self.exprs.len());
        for e in &self.exprs {
            values.push(expr::eval(e, &row.values, &self.input_columns)?);
        }
        Ok(Some(Row::new(values)))
    }

    fn close(&mut self) {
        self.child.close();
    }

    fn column_names(&self) -> &[String] {
        &self.output_columns
    }
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

type SortKeys = SmallVec<[Value; 4]>;

struct SortOp<'e> {
    child: Box<dyn Operator + 'e>,
    keys: Vec<Expr>,
    ascending: Vec<bool>,
    columns: Vec<String>,
    buffer: Vec<(SortKeys, Row)>,
    cursor: usize,
    materialized: bool,
}

impl SortOp<'_> {
    /// Drains the child into the sort buffer, charging every buffered row
    /// against the query memory budget and checking the budget as it goes.
    fn materialize(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        while let Some(row) = self.child.next(ctx)? {
            ctx.record_instructions(10);
            ctx.allocator().charge(row.approx_size())?;
            ctx.check_budget()?;

            let mut key_values: SortKeys = SmallVec::new();
            for key in &self.keys {
                key_values.push(expr::eval(key, &row.values, &self.columns)?);
            }
            self.buffer.push((key_values, row));
        }

        let ascending = self.ascending.clone();
        self.buffer.sort_by(|(a, _), (b, _)| {
            for (i, (ka, kb)) in a.iter().zip(b.iter()).enumerate() {
                let mut ord = ka.sort_cmp(kb);
                if !ascending.get(i).copied().unwrap_or(true) {
                    ord = ord.reverse();
                }
                if !ord.is_eq() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        self.materialized = true;
        Ok(())
    }
}

impl Operator for SortOp<'_> {
    fn open(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.buffer.clear();
        self.cursor = 0;
        self.materialized = false;
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        if !self.materialized {
            self.materialize(ctx)?;
        }

        if self.cursor < self.buffer.len() {
            let row = self.buffer[self.cursor].1.clone();
            self.cursor += 1;
            Ok(Some(row))
        } else {
            Ok(None)
        }
    }

    fn close(&mut self) {
        self.child.close();
        self.buffer.clear();
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }
}

// ---------------------------------------------------------------------------
// Limit
// ---------------------------------------------------------------------------

struct LimitOp<'e> {
    child: Box<dyn Operator + 'e>,
    columns: Vec<String>,
    /// Negative means unbounded.
    limit: i64,
    offset: i64,
    skipped: i64,
    returned: i64,
}

impl Operator for LimitOp<'_> {
    fn open(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.skipped = 0;
        self.returned = 0;
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        while self.skipped < self.offset {
            if self.child.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
            ctx.record_instructions(1);
        }

        if self.limit >= 0 && self.returned >= self.limit {
            return Ok(None);
        }

        match self.child.next(ctx)? {
            Some(row) => {
                self.returned += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.child.close();
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

enum NumericSum {
    Empty,
    Int(i64),
    Float(f64),
}

impl NumericSum {
    fn add(&mut self, value: &Value) -> Result<()> {
        let next = match (&*self, value) {
            (NumericSum::Empty, Value::Integer(i)) => NumericSum::Int(*i),
            (NumericSum::Empty, Value::Float(f)) => NumericSum::Float(*f),
            (NumericSum::Int(acc), Value::Integer(i)) => NumericSum::Int(
                acc.checked_add(*i)
                    .ok_or_else(|| eyre::eyre!("integer overflow in SUM"))?,
            ),
            (NumericSum::Int(acc), Value::Float(f)) => NumericSum::Float(*acc as f64 + f),
            (NumericSum::Float(acc), Value::Integer(i)) => NumericSum::Float(acc + *i as f64),
            (NumericSum::Float(acc), Value::Float(f)) => NumericSum::Float(acc + f),
            (_, other) => bail!("cannot aggregate {} numerically", other.data_type()),
        };
        *self = next;
        Ok(())
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            NumericSum::Empty => None,
            NumericSum::Int(i) => Some(*i as f64),
            NumericSum::Float(f) => Some(*f),
        }
    }
}

struct AggState {
    func: AggregateFunc,
    distinct: Option<HashSet<Vec<u8>>>,
    count: u64,
    sum: NumericSum,
    min: Option<Value>,
    max: Option<Value>,
}

impl AggState {
    fn new(agg: &AggregateExpr) -> Self {
        Self {
            func: agg.func,
            distinct: agg.distinct.then(HashSet::new),
            count: 0,
            sum: NumericSum::Empty,
            min: None,
            max: None,
        }
    }

    fn accumulate(&mut self, value: Option<&Value>) -> Result<()> {
        let Some(value) = value else {
            // COUNT(*): every row counts.
            self.count += 1;
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }

        if let Some(seen) = &mut self.distinct {
            let mut key = Vec::new();
            value.encode_key(&mut key);
            if !seen.insert(key) {
                return Ok(());
            }
        }

        self.count += 1;
        match self.func {
            AggregateFunc::Count => {}
            AggregateFunc::Sum | AggregateFunc::Avg => self.sum.add(value)?,
            AggregateFunc::Min => {
                let replace = self
                    .min
                    .as_ref()
                    .map_or(true, |current| value.sort_cmp(current).is_lt());
                if replace {
                    self.min = Some(value.clone());
                }
            }
            AggregateFunc::Max => {
                let replace = self
                    .max
                    .as_ref()
                    .map_or(true, |current| value.sort_cmp(current).is_gt());
                if replace {
                    self.max = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Value {
        match self.func {
            AggregateFunc::Count => Value::Integer(self.count as i64),
            AggregateFunc::Sum => match self.sum {
                NumericSum::Empty => Value::Null,
                NumericSum::Int(i) => Value::Integer(i),
                NumericSum::Float(f) => Value::Float(f),
            },
            AggregateFunc::Min => self.min.clone().unwrap_or(Value::Null),
            AggregateFunc::Max => self.max.clone().unwrap_or(Value::Null),
            AggregateFunc::Avg => match (self.sum.as_f64(), self.count) {
                (Some(sum), count) if count > 0 => Value::Float(sum / count as f64),
                _ => Value::Null,
            },
        }
    }
}

struct AggregateOp<'e> {
    child: Box<dyn Operator + 'e>,
    aggregates: Vec<AggregateExpr>,
    input_columns: Vec<String>,
    output_columns: Vec<String>,
    emitted: bool,
}

impl Operator for AggregateOp<'_> {
    fn open(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.emitted = false;
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<Option<Row>> {
        if self.emitted {
            return Ok(None);
        }

        let mut states: Vec<AggState> = self.aggregates.iter().map(AggState::new).collect();

        while let Some(row) = self.child.next(ctx)? {
            ctx.record_instructions(5);
            ctx.check_budget()?;

            for (agg, state) in self.aggregates.iter().zip(states.iter_mut()) {
                match &agg.arg {
                    None => state.accumulate(None)?,
                    Some(Expr::Star) => state.accumulate(None)?,
                    Some(arg) => {
                        let value = expr::eval(arg, &row.values, &self.input_columns)?;
                        state.accumulate(Some(&value))?;
                    }
                }
            }
        }

        self.emitted = true;
        let values = states.iter().map(AggState::finalize).collect();
        Ok(Some(Row::new(values)))
    }

    fn close(&mut self) {
        self.child.close();
    }

    fn column_names(&self) -> &[String] {
        &self.output_columns
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor<'e> {
    pager: &'e PageManager,
    catalog: &'e Mutex<Catalog>,
    wal: &'e Wal,
    wal_sync: bool,
    catalog_path: PathBuf,
}

impl<'e> Executor<'e> {
    pub fn new(
        pager: &'e PageManager,
        catalog: &'e Mutex<Catalog>,
        wal: &'e Wal,
        wal_sync: bool,
        catalog_path: PathBuf,
    ) -> Self {
        Self {
            pager,
            catalog,
            wal,
            wal_sync,
            catalog_path,
        }
    }

    /// Runs a plan to completion. Budget violations and validation errors
    /// come back as a failed result, not an `Err`; the process-level error
    /// path is reserved for the adapter layer.
    pub fn execute(&self, plan: &PlanNode, ctx: &mut ExecutionContext<'_>) -> ExecutionResult {
        ctx.start();

        let outcome = match plan {
            PlanNode::Insert {
                table_name,
                columns,
                values,
            } => self.execute_insert(table_name, columns, values, ctx),
            PlanNode::CreateTable {
                table_name,
                columns,
                if_not_exists,
            } => self.execute_create_table(table_name, columns, *if_not_exists, ctx),
            PlanNode::DropTable {
                table_name,
                if_exists,
            } => self.execute_drop_table(table_name, *if_exists, ctx),
            query => self.execute_query(query, ctx),
        };

        ctx.finalize();

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let (message, violation) = classify_error(&e);
                debug!(error = %message, "query failed");
                ExecutionResult::failure(message, violation)
            }
        };
        result.stats = ctx.stats().clone();
        result
    }

    fn execute_query(&self, plan: &PlanNode, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
        let mut op = self.build_operator(plan)?;
        op.open(ctx)?;

        let column_names = op.column_names().to_vec();
        let mut rows = Vec::new();

        let drive = loop {
            match op.next(ctx) {
                Ok(Some(row)) => {
                    if let Err(e) = ctx.check_budget() {
                        break Err(e);
                    }
                    ctx.record_row_returned();
                    rows.push(row);
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        op.close();
        drive?;

        let mut result = ExecutionResult::ok();
        result.column_names = column_names;
        result.rows = rows;
        Ok(result)
    }

    fn build_operator(&self, plan: &PlanNode) -> Result<Box<dyn Operator + 'e>> {
        match plan {
            PlanNode::TableScan { table_name } => {
                let table = self.lookup_table(table_name)?;
                Ok(Box::new(TableScanOp::new(self.pager, table)))
            }
            PlanNode::Filter { child, predicate } => {
                let child = self.build_operator(child)?;
                let columns = child.column_names().to_vec();
                Ok(Box::new(FilterOp {
                    child,
                    predicate: predicate.clone(),
                    columns,
                }))
            }
            PlanNode::Project {
                child,
                exprs,
                output_names,
            } => {
                let child = self.build_operator(child)?;
                let input_columns = child.column_names().to_vec();

                // `*` expands against the child's columns at build time so
                // the evaluator never sees it.
                let mut out_exprs = Vec::new();
                let mut out_names = Vec::new();
                for (i, e) in exprs.iter().enumerate() {
                    if matches!(e, Expr::Star) {
                        for name in &input_columns {
                            out_exprs.push(Expr::column(name.clone()));
                            out_names.push(name.clone());
                        }
                    } else {
                        out_exprs.push(e.clone());
                        out_names.push(
                            output_names
                                .get(i)
                                .cloned()
                                .unwrap_or_else(|| format!("col{}", i)),
                        );
                    }
                }

                Ok(Box::new(ProjectOp {
                    child,
                    exprs: out_exprs,
                    input_columns,
                    output_columns: out_names,
                }))
            }
            PlanNode::Sort {
                child,
                keys,
                ascending,
            } => {
                ensure!(
                    keys.len() == ascending.len(),
                    "sort has {} keys but {} directions",
                    keys.len(),
                    ascending.len()
                );
                let child = self.build_operator(child)?;
                let columns = child.column_names().to_vec();
                Ok(Box::new(SortOp {
                    child,
                    keys: keys.clone(),
                    ascending: ascending.clone(),
                    columns,
                    buffer: Vec::new(),
                    cursor: 0,
                    materialized: false,
                }))
            }
            PlanNode::Limit {
                child,
                limit,
                offset,
            } => {
                ensure!(*offset >= 0, "negative OFFSET {}", offset);
                let child = self.build_operator(child)?;
                let columns = child.column_names().to_vec();
                Ok(Box::new(LimitOp {
                    child,
                    columns,
                    limit: *limit,
                    offset: *offset,
                    skipped: 0,
                    returned: 0,
                }))
            }
            PlanNode::Aggregate { child, aggregates } => {
                ensure!(!aggregates.is_empty(), "aggregate plan with no aggregates");
                let child = self.build_operator(child)?;
                let input_columns = child.column_names().to_vec();
                let output_columns = aggregates.iter().map(|a| a.output_name.clone()).collect();
                Ok(Box::new(AggregateOp {
                    child,
                    aggregates: aggregates.clone(),
                    input_columns,
                    output_columns,
                    emitted: false,
                }))
            }
            PlanNode::Insert { .. } | PlanNode::CreateTable { .. } | PlanNode::DropTable { .. } => {
                bail!("mutation plans do not build operators")
            }
        }
    }

    fn lookup_table(&self, name: &str) -> Result<TableDef> {
        self.catalog
            .lock()
            .table(name)
            .cloned()
            .ok_or_else(|| eyre::eyre!("unknown table '{}'", name))
    }

    // -- INSERT -------------------------------------------------------------

    fn execute_insert(
        &self,
        table_name: &str,
        columns: &[String],
        values: &[Vec<Expr>],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionResult> {
        let table = self.lookup_table(table_name)?;

        // Map INSERT column list onto table column positions.
        let targets: Vec<usize> = if columns.is_empty() {
            (0..table.columns.len()).collect()
        } else {
            columns
                .iter()
                .map(|name| {
                    table
                        .find_column(name)
                        .ok_or_else(|| eyre::eyre!("unknown column '{}' in table '{}'", name, table_name))
                })
                .collect::<Result<_>>()?
        };

        let mut rows_affected = 0u64;
        for row_exprs in values {
            ensure!(
                row_exprs.len() == targets.len(),
                "INSERT row has {} values, expected {}",
                row_exprs.len(),
                targets.len()
            );

            let mut row_values = vec![Value::Null; table.columns.len()];
            for (e, &target) in row_exprs.iter().zip(targets.iter()) {
                let value = expr::eval(e, &[], &[])?;
                row_values[target] = coerce_for_column(value, &table.columns[target])?;
            }
            for (value, column) in row_values.iter().zip(table.columns.iter()) {
                ensure!(
                    !(column.not_null && value.is_null()),
                    "NULL in NOT NULL column '{}'",
                    column.name
                );
            }

            let payload = Record::from_values(row_values).serialize()?;
            self.insert_durable(table.id, &payload)?;
            rows_affected += 1;
            ctx.record_instructions(20);
            ctx.check_budget()?;
        }

        self.catalog
            .lock()
            .update_row_count(table.id, table.row_count + rows_affected);

        let mut result = ExecutionResult::ok();
        result.rows_affected = rows_affected;
        Ok(result)
    }

    /// The write protocol: pick the target page, predict the slot, log the
    /// change, sync, then apply. The page guard is held across the WAL
    /// append so the prediction cannot be invalidated.
    fn insert_durable(&self, table_id: u32, payload: &[u8]) -> Result<RowId> {
        let page_count = self.pager.table_page_count(table_id)?;

        let mut guard = None;
        if page_count > 0 {
            let candidate = self.pager.page(table_id, page_count - 1)?;
            if candidate.page().can_fit(payload.len()) {
                guard = Some(candidate);
            }
        }
        let mut guard = match guard {
            Some(g) => g,
            None => self.pager.allocate_page(table_id)?,
        };

        ensure!(
            guard.page().can_fit(payload.len()),
            "row of {} bytes does not fit in an empty page",
            payload.len()
        );

        let page_id = guard.page_id();
        let slot_id = guard.page().slot_count();

        let lsn = self
            .wal
            .append(&WalRecord::insert(table_id, page_id, slot_id, payload.to_vec()))?;
        if self.wal_sync {
            self.wal.sync()?;
        }

        let page = guard.page_mut();
        let slot = page.insert_record(payload)?;
        debug_assert_eq!(slot, slot_id, "slot prediction must hold under the write lock");
        page.set_lsn(lsn);

        Ok(RowId { page_id, slot_id: slot })
    }

    // -- CREATE TABLE / DROP TABLE -------------------------------------------

    fn execute_create_table(
        &self,
        table_name: &str,
        columns: &[ColumnSpec],
        if_not_exists: bool,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionResult> {
        ctx.record_instructions(100);

        let table_id = {
            let mut catalog = self.catalog.lock();
            if catalog.table_exists(table_name) {
                if if_not_exists {
                    return Ok(ExecutionResult::ok());
                }
                bail!("table '{}' already exists", table_name);
            }

            let defs = columns
                .iter()
                .enumerate()
                .map(|(i, spec)| {
                    let mut def = ColumnDef::new(spec.name.clone(), spec.data_type, i as u32);
                    def.not_null = spec.not_null;
                    def.primary_key = spec.primary_key;
                    def
                })
                .collect();
            catalog.create_table(table_name, defs)?
        };

        self.wal
            .append(&WalRecord::create_table(table_id, table_name))?;
        if self.wal_sync {
            self.wal.sync()?;
        }
        self.pager.create_table_file(table_id)?;
        self.persist_catalog()?;

        Ok(ExecutionResult::ok())
    }

    fn execute_drop_table(
        &self,
        table_name: &str,
        if_exists: bool,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionResult> {
        ctx.record_instructions(50);

        let dropped = {
            let mut catalog = self.catalog.lock();
            if !catalog.table_exists(table_name) {
                if if_exists {
                    return Ok(ExecutionResult::ok());
                }
                bail!("table '{}' not found", table_name);
            }
            catalog.drop_table(table_name)?
        };

        self.wal
            .append(&WalRecord::drop_table(dropped.id, table_name))?;
        if self.wal_sync {
            self.wal.sync()?;
        }
        self.pager.remove_table_file(dropped.id)?;
        self.persist_catalog()?;

        Ok(ExecutionResult::ok())
    }

    fn persist_catalog(&self) -> Result<()> {
        let catalog = self.catalog.lock();
        crate::schema::persistence::save(&catalog, &self.catalog_path)
    }
}

/// Widens INSERT values to the column type where lossless, rejects real
/// mismatches. NULL passes here; NOT NULL is enforced separately.
fn coerce_for_column(value: Value, column: &ColumnDef) -> Result<Value> {
    match (&value, column.data_type) {
        (Value::Null, _) => Ok(value),
        (Value::Integer(_), DataType::Integer)
        | (Value::Float(_), DataType::Float)
        | (Value::Text(_), DataType::Text)
        | (Value::Blob(_), DataType::Blob)
        | (Value::Boolean(_), DataType::Boolean) => Ok(value),
        (Value::Integer(i), DataType::Float) => Ok(Value::Float(*i as f64)),
        (got, want) => bail!(
            "type mismatch for column '{}': expected {}, got {}",
            column.name,
            want,
            got.data_type()
        ),
    }
}

fn classify_error(e: &eyre::Report) -> (String, Option<BudgetViolation>) {
    if let Some(budget) = e.downcast_ref::<BudgetError>() {
        return (budget.message.clone(), Some(budget.violation));
    }
    if let Some(alloc) = e.downcast_ref::<AllocError>() {
        return (alloc.to_string(), Some(BudgetViolation::MemoryExceeded));
    }
    (format!("{:#}", e), None)
}
