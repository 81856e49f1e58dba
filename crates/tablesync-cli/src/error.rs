use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tablesync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Input must be a JSON array of objects")]
    InvalidInput,
    #[error("Invalid filter '{0}': expected FIELD OP VALUE with OP one of = != > >= < <=")]
    InvalidFilter(String),
    #[error("Configuration error: {0}")]
    Config(String),
}
