//! File-based configuration for database groups and logging.
//!
//! ```toml
//! [logging]
//! level = "info"
//! dir = "/var/log/shardline"
//!
//! [groups.main]
//! master_path = "/var/lib/shardline/master.db"
//! data_dir = "/var/lib/shardline/shards"
//!
//! [groups.ids]
//! master_path = "/var/lib/shardline/ids.db"
//! sharded = false
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 64;

/// Configuration loading and validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config syntax: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Top-level configuration: logging plus one entry per database group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub dir: PathBuf,
}

/// Settings for one database group (one virtual transaction coordinator).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    /// Master database file, or `:memory:`.
    pub master_path: PathBuf,
    #[serde(default = "default_true")]
    pub master_writable: bool,
    /// `false` for single-host auxiliary databases without a shard directory.
    #[serde(default = "default_true")]
    pub sharded: bool,
    /// Directory holding shard database files; defaults to the master's directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub create_missing_shards: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
}

impl GroupConfig {
    /// Group settings with defaults for everything but the master path.
    pub fn new(master_path: impl Into<PathBuf>) -> Self {
        Self {
            master_path: master_path.into(),
            master_writable: true,
            sharded: true,
            data_dir: None,
            create_missing_shards: true,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| crate::shard::connection::default_data_dir(&self.master_path))
    }

    pub fn is_in_memory(&self) -> bool {
        self.master_path.as_os_str() == ":memory:"
    }
}

impl ClusterConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [groups.<name>] entry is required".to_string(),
            ));
        }
        for (name, group) in &self.groups {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("group names cannot be blank".to_string()));
            }
            if group.master_path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "group `{name}` has an empty master_path"
                )));
            }
            if group.statement_cache_capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "group `{name}` statement_cache_capacity must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    crate::logging::default_log_level().to_string()
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

const fn default_statement_cache_capacity() -> usize {
    DEFAULT_STATEMENT_CACHE_CAPACITY
}
