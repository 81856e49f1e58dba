//! Error types for tablesync-core

use thiserror::Error;

/// Result type alias using tablesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tablesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Caller input rejected before any statement was sent
    #[error("Validation error: {0}")]
    Validation(String),

    /// A field name that does not exist on the table
    #[error("Unknown field '{field}' on table '{table}'")]
    UnknownField {
        /// Table the lookup was made against
        table: String,
        /// Offending field name
        field: String,
    },

    /// A record value could not be coerced to its storage representation
    #[error("Cannot encode column '{column}' of record #{record} for table '{table}': {reason}")]
    Encoding {
        /// Target table
        table: String,
        /// Offending column
        column: String,
        /// Position of the record in the caller's batch
        record: usize,
        /// What went wrong
        reason: String,
    },

    /// A stored value could not be turned back into an in-memory value
    #[error("Cannot decode column '{column}': {reason}")]
    Decoding {
        /// Offending column
        column: String,
        /// What went wrong
        reason: String,
    },

    /// The requested combination of options is not available on this engine
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A single-row lookup matched more than one row
    #[error("Expected at most one row in '{table}', found {count}")]
    MultipleRows {
        /// Table that was queried
        table: String,
        /// Number of matching rows
        count: usize,
    },

    /// A single-row lookup matched nothing
    #[error("No row found in '{0}'")]
    NotFound(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Error reported by another storage engine
    #[error("Database error: {0}")]
    Database(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error was raised by the storage engine rather than by input checks
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Database(_))
    }
}
