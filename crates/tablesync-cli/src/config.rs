//! Persistent CLI configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tablesync_core::DatabaseConfig;

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default = "default_ignore_duplicate_updates")]
    pub ignore_duplicate_updates: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            database: DatabaseConfig::default(),
            ignore_duplicate_updates: default_ignore_duplicate_updates(),
        }
    }
}

const fn default_config_version() -> u32 {
    1
}

const fn default_ignore_duplicate_updates() -> bool {
    true
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tablesync")
        .join(CONFIG_FILE_NAME)
}

impl CliConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        if config.database.max_parameters == Some(0) {
            return Err(format!(
                "Invalid config at {}: max_parameters must be greater than zero",
                path.display()
            ));
        }
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let serialized = serde_json::to_string_pretty(self)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CliConfig::default());
        assert!(config.ignore_duplicate_updates);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = CliConfig::default();
        config.database.path = Some(PathBuf::from("/tmp/data.db"));
        config.database.force_naive = true;
        config.ignore_duplicate_updates = false;

        config.save_to_path(&path).unwrap();
        assert_eq!(CliConfig::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn rejects_unknown_database_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"database": {"pth": "x.db"}}"#).unwrap();
        assert!(CliConfig::load_from_path(&path).is_err());
    }

    #[test]
    fn rejects_zero_parameter_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"database": {"max_parameters": 0}}"#).unwrap();
        let error = CliConfig::load_from_path(&path).unwrap_err();
        assert!(error.contains("max_parameters"));
    }
}
