//! `SQLite` connection management

use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqliteValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};

use super::{Executor, Row};
use crate::config::DatabaseConfig;
use crate::dialect::{Capabilities, Dialect};
use crate::error::{Error, Result};
use crate::schema::{Field, FieldKind, Table};
use crate::sql::Statement;
use crate::value::SqlValue;

/// First `SQLite` release with `RETURNING`
const RETURNING_VERSION: i32 = 3_035_000;
/// First `SQLite` release with the 32766 default variable limit
const LARGE_VARIABLE_LIMIT_VERSION: i32 = 3_032_000;

/// Database wrapper for a rusqlite connection
pub struct Database {
    conn: Connection,
    capabilities: Capabilities,
    depth: Cell<u32>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(&DatabaseConfig::at(path.as_ref()))
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open_with_config(&DatabaseConfig::default())
    }

    /// Open and configure according to `config`
    pub fn open_with_config(config: &DatabaseConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        let database = Self::from_connection(conn);
        database.configure(config)?;

        let mut capabilities = if config.force_naive {
            Capabilities::naive(Dialect::Sqlite)
        } else {
            database.capabilities.clone()
        };
        if let Some(max) = config.max_parameters {
            capabilities = capabilities.with_max_parameters(max);
        }
        Ok(database.with_capabilities(capabilities))
    }

    /// Wrap an existing connection, detecting capabilities from the library version
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            capabilities: detect_capabilities(rusqlite::version_number()),
            depth: Cell::new(0),
        }
    }

    /// Replace the detected capabilities (e.g. to force the naive path)
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Configure `SQLite` pragmas
    fn configure(&self, config: &DatabaseConfig) -> Result<()> {
        if config.path.is_some() {
            // In-memory databases always report "memory". A failure here (the
            // journal mode locked by another connection, for one) is not fatal.
            if let Err(error) = self.conn.pragma_update_and_check(
                None,
                "journal_mode",
                config.journal_mode.as_str(),
                |row| row.get::<_, String>(0),
            ) {
                tracing::warn!(
                    "Failed to set journal mode {}: {error}",
                    config.journal_mode.as_str()
                );
            }
        }
        self.conn
            .pragma_update(None, "foreign_keys", config.foreign_keys)?;
        if let Some(ms) = config.busy_timeout_ms {
            self.conn.busy_timeout(Duration::from_millis(ms))?;
        }
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Build a [`Table`] descriptor from the live schema
    ///
    /// A single `INTEGER` primary key is a rowid alias and is marked identity.
    /// Auto-populated timestamps cannot be discovered and stay `Never`.
    pub fn introspect(&self, table: &str) -> Result<Table> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?)")?;
        let columns = stmt
            .query_map(params![table], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if columns.is_empty() {
            return Err(Error::NotFound(table.to_string()));
        }

        let pk_count = columns.iter().filter(|(_, _, _, pk)| *pk > 0).count();
        let fields = columns
            .into_iter()
            .map(|(name, decl, not_null, pk)| {
                let mut field = Field::new(name, FieldKind::from_sqlite_decl(&decl));
                if pk > 0 {
                    field = field.primary_key();
                    if pk_count == 1 && decl.eq_ignore_ascii_case("INTEGER") {
                        field = field.identity();
                    }
                } else if !not_null {
                    field = field.nullable();
                }
                field
            })
            .collect();

        Table::new(table, fields)
    }

    fn savepoint_name(depth: u32) -> String {
        format!("tablesync_{depth}")
    }
}

fn detect_capabilities(version: i32) -> Capabilities {
    let capabilities = if version >= RETURNING_VERSION {
        Capabilities::sqlite()
    } else {
        Capabilities::naive(Dialect::Sqlite)
    };
    if version >= LARGE_VARIABLE_LIMIT_VERSION {
        capabilities.with_max_parameters(32_766)
    } else {
        capabilities.with_max_parameters(999)
    }
}

impl Executor for Database {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "query");
        let mut stmt = self.conn.prepare(&statement.sql)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..width)
                .map(|idx| row.get_ref(idx).map(sql_value_from_ref))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    fn execute(&self, statement: &Statement) -> Result<usize> {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "execute");
        let affected = self
            .conn
            .execute(&statement.sql, params_from_iter(statement.params.iter()))?;
        Ok(affected)
    }

    fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let depth = self.depth.get();
        let name = Self::savepoint_name(depth);
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        self.depth.set(depth + 1);

        let outcome = f();
        self.depth.set(depth);

        match outcome {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE {name}"))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
                {
                    tracing::warn!("Failed to roll back savepoint {name}: {rollback}");
                }
                Err(err)
            }
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Self::Integer(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn sql_value_from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}
