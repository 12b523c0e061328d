//! # WrenDB - Budgeted Embedded Relational Engine
//!
//! WrenDB is a single-node, embedded relational database engine built for
//! resource-constrained edge environments (512MB-2GB RAM, possibly no
//! swap, intermittent power). Its two defining commitments:
//!
//! - **Every query runs under hard caps** - instructions, wall time,
//!   memory and result cardinality are enforced individually at operator
//!   granularity; violators terminate cleanly with a tagged error.
//! - **Every mutation survives a crash** - a CRC-protected write-ahead log
//!   plus checkpoint-based recovery rebuilds state with LSN-guarded
//!   idempotent replay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Public API (Engine)          │
//! ├─────────────────────────────────────┤
//! │   Executor (pull-based operators)   │
//! ├─────────────────┬───────────────────┤
//! │ Catalog         │ Txn Coordinator   │
//! ├─────────────────┴───────────────────┤
//! │  Buffer Pool (LRU, dirty-writeback) │
//! ├─────────────────────────────────────┤
//! │  Slotted Pages  │  WAL + Recovery   │
//! └─────────────────────────────────────┘
//! ```
//!
//! The SQL front-end (tokenizer, parser, planner), HTTP framing, TLS,
//! authentication, configuration loading and metrics exposition are
//! external adapters: they consume [`PlanNode`] and [`ExecutionResult`]
//! and never reach below the [`Engine`] surface.
//!
//! ## Quick Start
//!
//! ```ignore
//! use wrendb::{Engine, EngineConfig, PlanNode, ColumnSpec, Expr, DataType};
//!
//! let engine = Engine::open(EngineConfig::new("./data"))?;
//!
//! engine.execute(&PlanNode::create_table(
//!     "users",
//!     vec![
//!         ColumnSpec::new("id", DataType::Integer).primary_key(),
//!         ColumnSpec::new("name", DataType::Text),
//!     ],
//!     false,
//! ));
//!
//! engine.execute(&PlanNode::insert(
//!     "users",
//!     vec![],
//!     vec![vec![Expr::integer(1), Expr::string("alice")]],
//! ));
//!
//! let result = engine.execute(&PlanNode::table_scan("users"));
//! ```
//!
//! ## Concurrency Model
//!
//! Single writer, many readers. A writer-preferring latch serializes
//! mutations against the whole engine; readers observe the last committed
//! write. There is no background activity of any kind - checkpoints,
//! flushes and recovery all run on caller threads at well-defined points.
//!
//! ## Module Overview
//!
//! - [`config`]: format constants and the runtime [`EngineConfig`]
//! - [`memory`]: per-query arena + budget allocator, process-wide tracker
//! - [`storage`]: slotted pages, buffer pool, WAL, recovery, checkpoints
//! - [`schema`]: catalog and its persisted snapshot
//! - [`sql`]: plan/expression trees, budget context, pull-based executor
//! - [`txn`]: writer-preferring latch and transaction handles
//! - [`shutdown`]: phased shutdown with bounded drain
//! - [`engine`]: the façade tying it all together

pub mod config;
pub mod engine;
pub mod memory;
pub mod schema;
pub mod shutdown;
pub mod sql;
pub mod storage;
pub mod txn;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use schema::{Catalog, ColumnDef, TableDef};
pub use shutdown::{OperationGuard, ShutdownCoordinator, ShutdownPhase};
pub use sql::{
    AbortHandle, AggregateExpr, AggregateFunc, BinaryOp, BudgetViolation, ColumnSpec,
    ExecutionResult, ExecutionStats, Expr, Literal, PlanNode, QueryBudget, Row, UnaryOp,
};
pub use storage::RecoveryStats;
pub use types::{DataType, Value};
