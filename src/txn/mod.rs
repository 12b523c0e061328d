//! Single-writer / multi-reader transaction coordination.

mod latch;
mod transaction;

pub use latch::RwLatch;
pub use transaction::{Transaction, TransactionManager, TxnId, TxnState};
