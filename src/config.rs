use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Time-related constants
// =============================================================================

/// Default lifetime of cached tag lists in milliseconds (30 minutes)
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 30 * 60 * 1000;

/// Default interval between cache garbage collection sweeps (5 minutes)
pub const DEFAULT_GC_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Timeout for registry HTTP requests in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

/// Delay between starting each container check to avoid rate limiting (10ms)
pub const FETCH_STAGGER_DELAY_MS: u64 = 10;

/// User agent sent to registries
pub const DEFAULT_USER_AGENT: &str = concat!("version-checker/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config {path}: {field} {reason}")]
    Invalid {
        path: PathBuf,
        field: &'static str,
        reason: &'static str,
    },
}

/// Checker configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub cache: CacheConfig,
    pub registry: RegistryConfig,
    /// Check containers that carry no `enable` annotation
    pub test_all_containers: bool,
}

impl Config {
    /// Load configuration from a JSON file, or defaults when `path` is None
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if config.cache.gc_interval == 0 {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                field: "cache.gcInterval",
                reason: "must be greater than zero",
            });
        }

        Ok(config)
    }
}

/// Cache-related configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Lifetime of a cached tag list in milliseconds
    pub timeout: u64,
    /// Garbage collection interval in milliseconds
    pub gc_interval: u64,
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CACHE_TIMEOUT_MS,
            gc_interval: DEFAULT_GC_INTERVAL_MS,
        }
    }
}

/// Registry client configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Hosts reached over plain HTTP, e.g. `localhost:5000`
    pub insecure_hosts: Vec<String>,
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            insecure_hosts: Vec::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Returns the path to the data directory for version-checker.
/// Uses $XDG_DATA_HOME/version-checker if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/version-checker,
/// or ./version-checker if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the default path of the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("version-checker.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("version-checker")
}
