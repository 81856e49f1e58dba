//! SQL dialects and engine capabilities

use serde::{Deserialize, Serialize};

/// SQL flavor a statement is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `SQLite` 3.35+ (`ON CONFLICT ... RETURNING`, `UPDATE ... FROM`)
    Sqlite,
    /// `PostgreSQL` 9.5+
    Postgres,
}

impl Dialect {
    /// Quote an identifier, doubling embedded quotes
    pub fn quote(self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Placeholder for the `n`-th (1-based) bound parameter
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Sqlite => "?".to_string(),
            Self::Postgres => format!("${n}"),
        }
    }

    /// Name of the pseudo-table holding proposed values in `ON CONFLICT`
    pub const fn excluded(self) -> &'static str {
        match self {
            Self::Sqlite => "excluded",
            Self::Postgres => "EXCLUDED",
        }
    }

    /// Operator meaning "differs, treating NULLs as equal"
    pub const fn distinct_operator(self) -> &'static str {
        match self {
            Self::Sqlite => "IS NOT",
            Self::Postgres => "IS DISTINCT FROM",
        }
    }
}

/// What the storage engine behind an executor can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// SQL flavor
    pub dialect: Dialect,
    /// Atomic `INSERT ... ON CONFLICT ... RETURNING`; without it the naive path runs
    pub conflict_upsert: bool,
    /// The engine reports "freshly inserted" per returned row (Postgres `xmax = 0`)
    pub native_insert_signal: bool,
    /// Conflict targets may span several columns
    pub composite_conflict_target: bool,
    /// Untouched rows can be recovered by joining the input back to the table
    pub untouched_join_back: bool,
    /// Upper bound on bound parameters per statement
    pub max_parameters: usize,
}

impl Capabilities {
    /// `SQLite` with `RETURNING` support
    pub const fn sqlite() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            conflict_upsert: true,
            native_insert_signal: false,
            composite_conflict_target: true,
            untouched_join_back: true,
            max_parameters: 32_766,
        }
    }

    /// `PostgreSQL`
    pub const fn postgres() -> Self {
        Self {
            dialect: Dialect::Postgres,
            conflict_upsert: true,
            native_insert_signal: true,
            composite_conflict_target: true,
            untouched_join_back: true,
            max_parameters: 65_535,
        }
    }

    /// An engine that only supports read-then-write
    pub const fn naive(dialect: Dialect) -> Self {
        Self {
            dialect,
            conflict_upsert: false,
            native_insert_signal: false,
            composite_conflict_target: false,
            untouched_join_back: false,
            max_parameters: 999,
        }
    }

    /// Override the parameter limit
    #[must_use]
    pub const fn with_max_parameters(mut self, max: usize) -> Self {
        self.max_parameters = max;
        self
    }

    /// How many rows of `width` bound values fit in one statement
    pub fn rows_per_statement(&self, width: usize) -> usize {
        (self.max_parameters / width.max(1)).max(1)
    }
}
