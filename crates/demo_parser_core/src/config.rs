//! Pipeline configuration.
//!
//! Loaded from a JSON document; every field has a default so `{}` is a valid
//! configuration.

use crate::db::{open_db, open_db_in_memory, Database, DbError, DbLocation};
use crate::logging::{default_log_level, init_logging, normalize_level, normalize_log_dir};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Default on-disk store location.
pub const DEFAULT_DB_PATH: &str = "data/demo_parser.db";
pub const DEFAULT_MAX_ITEMS_FOR_DETAILS: u32 = 20;
pub const DEFAULT_MAX_ITEMS_FOR_HTML: u32 = 100;

/// Backing store selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    #[default]
    File,
    /// Private in-memory store; nothing survives the process.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub storage: StorageMode,
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute directory for rolling logs; `None` leaves logging off.
    pub log_dir: Option<PathBuf>,
    /// Work-queue size handed to the detail stage.
    pub max_items_for_details: u32,
    /// Work-queue size handed to the html stage.
    pub max_items_for_html: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage: StorageMode::File,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            log_level: default_log_level().to_string(),
            log_dir: None,
            max_items_for_details: DEFAULT_MAX_ITEMS_FOR_DETAILS,
            max_items_for_html: DEFAULT_MAX_ITEMS_FOR_HTML,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    EmptyDbPath,
    ZeroLimit(&'static str),
    InvalidLogLevel(String),
    InvalidLogDir(String),
    Logging(String),
    Db(DbError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config JSON: {err}"),
            Self::EmptyDbPath => write!(f, "db_path cannot be empty in file storage mode"),
            Self::ZeroLimit(field) => write!(f, "{field} must be greater than zero"),
            Self::InvalidLogLevel(message) => write!(f, "{message}"),
            Self::InvalidLogDir(message) => write!(f, "{message}"),
            Self::Logging(message) => write!(f, "logging init failed: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl From<DbError> for ConfigError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl PipelineConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage == StorageMode::File && self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDbPath);
        }
        if self.max_items_for_details == 0 {
            return Err(ConfigError::ZeroLimit("max_items_for_details"));
        }
        if self.max_items_for_html == 0 {
            return Err(ConfigError::ZeroLimit("max_items_for_html"));
        }
        normalize_level(&self.log_level).map_err(ConfigError::InvalidLogLevel)?;
        if let Some(log_dir) = &self.log_dir {
            normalize_log_dir(&log_dir.to_string_lossy()).map_err(ConfigError::InvalidLogDir)?;
        }
        Ok(())
    }

    pub fn db_location(&self) -> DbLocation {
        match self.storage {
            StorageMode::File => DbLocation::File(self.db_path.clone()),
            StorageMode::Memory => DbLocation::Memory,
        }
    }

    /// Opens the configured store with every migration applied.
    pub fn open_database(&self) -> Result<Database, ConfigError> {
        let db = match self.storage {
            StorageMode::File => open_db(&self.db_path)?,
            StorageMode::Memory => open_db_in_memory()?,
        };
        Ok(db)
    }

    /// Starts file logging when `log_dir` is set; otherwise does nothing.
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match &self.log_dir {
            Some(log_dir) => init_logging(&self.log_level, &log_dir.to_string_lossy())
                .map_err(ConfigError::Logging),
            None => Ok(()),
        }
    }
}
