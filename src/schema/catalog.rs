//! # Catalog
//!
//! In-memory table metadata: ids, names, column definitions and a row-count
//! estimate for planning. Table ids are process-monotone; id 0 is reserved
//! as invalid. Thread safety is provided by the engine, which wraps the
//! catalog in a mutex.

use eyre::{ensure, Result};
use hashbrown::HashMap;

use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub primary_key: bool,
    /// Column position within the table.
    pub index: u32,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType, index: u32) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: false,
            primary_key: false,
            index,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub id: u32,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Estimate maintained by the executor; not authoritative.
    pub row_count: u64,
}

impl TableDef {
    pub fn new(id: u32, name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
            row_count: 0,
        }
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(Debug)]
pub struct Catalog {
    tables: HashMap<String, TableDef>,
    next_table_id: u32,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            next_table_id: 1,
        }
    }

    pub(crate) fn from_parts(tables: HashMap<String, TableDef>, next_table_id: u32) -> Self {
        Self {
            tables,
            next_table_id,
        }
    }

    pub fn next_table_id(&self) -> u32 {
        self.next_table_id
    }

    /// Registers a table and returns its id.
    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnDef>) -> Result<u32> {
        ensure!(
            !self.table_exists(name),
            "table '{}' already exists",
            name
        );
        ensure!(!columns.is_empty(), "table '{}' needs at least one column", name);

        let id = self.next_table_id;
        self.next_table_id += 1;
        self.tables
            .insert(name.to_string(), TableDef::new(id, name, columns));
        Ok(id)
    }

    /// Removes a table, returning its definition.
    pub fn drop_table(&mut self, name: &str) -> Result<TableDef> {
        self.tables
            .remove(name)
            .ok_or_else(|| eyre::eyre!("table '{}' not found", name))
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn table_by_id(&self, id: u32) -> Option<&TableDef> {
        self.tables.values().find(|t| t.id == id)
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tables(&self) -> &HashMap<String, TableDef> {
        &self.tables
    }

    pub fn update_row_count(&mut self, table_id: u32, row_count: u64) {
        if let Some(table) = self.tables.values_mut().find(|t| t.id == table_id) {
            table.row_count = row_count;
        }
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.next_table_id = 1;
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
