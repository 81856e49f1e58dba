//! Database configuration
//!
//! Loaded from JSON by the CLI; library callers may also build it in code.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `SQLite` journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log
    #[default]
    Wal,
    /// Rollback journal
    Delete,
    /// In-memory journal
    Memory,
}

impl JournalMode {
    /// Pragma value
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// How to open and configure a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Journal mode applied on open (ignored for in-memory databases)
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// Enforce foreign keys
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
    /// How long to wait on a locked database
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
    /// Cap on bound parameters per statement
    #[serde(default)]
    pub max_parameters: Option<usize>,
    /// Use the read-then-write path even when the engine has atomic upserts
    #[serde(default)]
    pub force_naive: bool,
}

const fn default_foreign_keys() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            journal_mode: JournalMode::default(),
            foreign_keys: default_foreign_keys(),
            busy_timeout_ms: None,
            max_parameters: None,
            force_naive: false,
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a database file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parse from JSON text
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.max_parameters == Some(0) {
            return Err(Error::Validation(
                "max_parameters must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
