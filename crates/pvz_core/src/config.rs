//! Runtime configuration for the PVZ core.
//!
//! Values come from `PVZ_*` environment variables; anything unset keeps its
//! default.

use crate::db::DEFAULT_BUSY_TIMEOUT;
use crate::repo::pvz_repo::DEFAULT_PAGE_SIZE;
use crate::telemetry::default_log_level;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "PVZ_DB_PATH";
pub const ENV_POOL_SIZE: &str = "PVZ_POOL_SIZE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "PVZ_BUSY_TIMEOUT_MS";
pub const ENV_PAGE_SIZE: &str = "PVZ_PAGE_SIZE";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "PVZ_REQUEST_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "PVZ_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "PVZ_LOG_DIR";

const DEFAULT_POOL_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidNumber { key: &'static str, value: String },
    ZeroPoolSize,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNumber { key, value } => {
                write!(f, "`{key}` must be a non-negative integer, got `{value}`")
            }
            Self::ZeroPoolSize => write!(f, "`{ENV_POOL_SIZE}` must be at least 1"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvzConfig {
    /// Database file; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Connections opened for a file database.
    pub pool_size: usize,
    /// Upper bound on waiting for a database lock.
    pub busy_timeout: Duration,
    /// Page size the service uses when a listing request names none.
    pub default_page_size: u32,
    /// Per-call bound the service applies on top of the caller's deadline.
    pub request_timeout: Option<Duration>,
    pub log_level: String,
    /// Absolute directory for rotating log files; `None` disables file logs.
    pub log_dir: Option<String>,
}

impl Default for PvzConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            default_page_size: DEFAULT_PAGE_SIZE,
            request_timeout: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl PvzConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(path) = get(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(value) = get(ENV_POOL_SIZE) {
            config.pool_size = parse_number(ENV_POOL_SIZE, &value)?;
            if config.pool_size == 0 {
                return Err(ConfigError::ZeroPoolSize);
            }
        }
        if let Some(value) = get(ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout = Duration::from_millis(parse_number(ENV_BUSY_TIMEOUT_MS, &value)?);
        }
        if let Some(value) = get(ENV_PAGE_SIZE) {
            config.default_page_size = parse_number(ENV_PAGE_SIZE, &value)?;
        }
        if let Some(value) = get(ENV_REQUEST_TIMEOUT_MS) {
            let millis = parse_number(ENV_REQUEST_TIMEOUT_MS, &value)?;
            config.request_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        config.log_dir = get(ENV_LOG_DIR);

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}
