//! Table metadata and its persisted snapshot.

mod catalog;
pub mod persistence;

pub use catalog::{Catalog, ColumnDef, TableDef};
