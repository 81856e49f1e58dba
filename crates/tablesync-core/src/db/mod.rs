//! Storage boundary
//!
//! The engine never talks to a driver directly; it goes through [`Executor`],
//! which `SQLite` implements in [`Database`]. Other engines plug in by
//! implementing the trait and reporting their [`Capabilities`].

mod connection;

pub use connection::Database;

use std::sync::Arc;

use crate::bulk;
use crate::dialect::Capabilities;
use crate::error::Result;
use crate::schema::Table;
use crate::sql::Statement;
use crate::value::SqlValue;

/// A row returned by a statement, with named columns
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Build a row; `columns` and `values` are parallel
    pub fn new(columns: impl Into<Arc<[String]>>, values: Vec<SqlValue>) -> Self {
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Value of `column`
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// `(column, value)` pairs in statement order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> + '_ {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Statement execution against one storage engine
pub trait Executor {
    /// What this engine supports
    fn capabilities(&self) -> &Capabilities;

    /// Run a statement and collect every returned row
    fn query(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run a statement that returns no rows; yields the affected row count
    fn execute(&self, statement: &Statement) -> Result<usize>;

    /// Run `f` so that its statements commit or roll back together
    fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;

    /// Delete rows of `table` by primary key
    fn delete(&self, table: &Table, keys: &[SqlValue]) -> Result<usize> {
        let mut deleted = 0;
        for statement in bulk::delete_statements(table, keys, self.capabilities()) {
            deleted += self.execute(&statement)?;
        }
        Ok(deleted)
    }
}
