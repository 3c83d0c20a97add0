///
/// # Mapper Configuration
///
/// Where the database lives and how each connection is opened. Defaults match
/// a bare `Mapper::default()`: a `storm.db` file in the working directory,
/// created when missing, with foreign key enforcement on.
///
/// ## Example storm.toml
///
/// ```toml
/// [database]
/// path = "data/inventory.db"
/// create_if_missing = true
/// foreign_keys = true
/// ```
///
/// Every key is optional; an empty file yields the defaults.
///

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use storm_core::{Result, StormError};

pub const DEFAULT_DATABASE: &str = "storm.db";
pub const CONFIG_FILE: &str = "storm.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MapperConfig {
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub create_if_missing: bool,
    pub foreign_keys: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE),
            create_if_missing: true,
            foreign_keys: true,
        }
    }
}

impl MapperConfig {
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig {
                path: path.into(),
                ..DatabaseConfig::default()
            },
        }
    }

    /// Loads a config file. A relative database path is resolved against
    /// the directory holding the file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content).map_err(|reason| StormError::Config {
            path: path.to_path_buf(),
            reason,
        })?;

        if config.database.path.is_relative() {
            if let Some(dir) = path.parent() {
                config.database.path = dir.join(&config.database.path);
            }
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Self::parse(content).map_err(|reason| StormError::Config {
            path: PathBuf::from(CONFIG_FILE),
            reason,
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| StormError::Config {
            path: PathBuf::from(CONFIG_FILE),
            reason: e.to_string(),
        })
    }
}
