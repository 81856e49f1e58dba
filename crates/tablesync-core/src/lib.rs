//! tablesync-core - Bulk data synchronization for relational tables
//!
//! This crate contains the table descriptors, row codec, statement builders
//! and the upsert/sync engine used by the tablesync CLI. A call goes through
//! [`BulkSync`], which runs against any [`Executor`]; [`Database`] is the
//! bundled `SQLite` executor.

pub mod bulk;
pub mod codec;
pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod notify;
pub mod record;
pub mod schema;
pub mod scope;
pub mod services;
pub mod sql;
pub mod upsert;
pub mod value;

pub use config::DatabaseConfig;
pub use db::{Database, Executor, Row};
pub use dialect::{Capabilities, Dialect};
pub use error::{Error, Result};
pub use notify::{BulkEvent, BulkObserver, BulkOperation};
pub use record::{DynamicRecord, Record, ResultRow, RowStatus};
pub use schema::{AutoPopulate, Field, FieldKind, Table};
pub use scope::{Comparison, Lookup, Scope};
pub use services::BulkSync;
pub use upsert::{ExecutionPath, Returning, UpsertOptions, UpsertResult};
pub use value::{SqlValue, Value};
