//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::image::{DEFAULT_COST_LIMIT, DEFAULT_MAX_CACHE_SIZE};

pub(super) const APP_NAME: &str = "travelog";
pub(super) const APP_QUALIFIER: &str = "com";
pub(super) const APP_ORGANIZATION: &str = "travelog";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache tier budgets and location.
    #[serde(default)]
    pub cache: CacheConfig,

    /// HTTP settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Prefetch limits.
    #[serde(default)]
    pub prefetch: PrefetchConfig,

    /// Display parameters.
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Cache tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory tier budget in estimated decoded bytes.
    #[serde(default = "default_memory_cost_limit")]
    pub memory_cost_limit: usize,

    /// Disk tier budget in bytes.
    #[serde(default = "default_disk_byte_limit")]
    pub disk_byte_limit: u64,

    /// Disk tier directory. Defaults to the platform cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Returns the configured disk directory or the platform default.
    #[must_use]
    pub fn effective_disk_dir(&self) -> PathBuf {
        self.disk_dir
            .clone()
            .or_else(AppConfig::default_cache_dir)
            .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME).join("images"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_cost_limit: default_memory_cost_limit(),
            disk_byte_limit: default_disk_byte_limit(),
            disk_dir: None,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl NetworkConfig {
    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Prefetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Candidates accepted per call.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Prefetch fetches allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Display configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Pixels per point.
    #[serde(default = "default_scale")]
    pub scale: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
        }
    }
}

const fn default_memory_cost_limit() -> usize {
    DEFAULT_COST_LIMIT
}

const fn default_disk_byte_limit() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_batch_limit() -> usize {
    20
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_scale() -> f32 {
    2.0
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.disk_dir = Some(cache_dir.clone());
        }
        if let Some(scale) = args.scale {
            self.display.scale = scale;
        }
        if let Some(timeout) = args.timeout_secs {
            self.network.timeout_secs = timeout;
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default disk tier directory.
    #[must_use]
    pub fn default_cache_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.cache_dir().join("images"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"

            [cache]
            memory_cost_limit = 1048576
            disk_dir = "/tmp/travelog-images"

            [display]
            scale = 3.0
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache.memory_cost_limit, 1_048_576);
        assert_eq!(config.cache.disk_byte_limit, DEFAULT_MAX_CACHE_SIZE);
        assert_eq!(
            config.cache.effective_disk_dir(),
            PathBuf::from("/tmp/travelog-images")
        );
        assert!((config.display.scale - 3.0).abs() < f32::EPSILON);
        assert_eq!(config.prefetch.batch_limit, 20);
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.cache.memory_cost_limit, 30 * 1024 * 1024);
        assert_eq!(config.cache.disk_byte_limit, 180 * 1024 * 1024);
        assert_eq!(config.network.timeout(), Duration::from_secs(30));
        assert_eq!(config.prefetch.max_concurrent, 4);
        assert!((config.display.scale - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let content = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.cache.disk_byte_limit, DEFAULT_MAX_CACHE_SIZE);
        assert_eq!(parsed.prefetch.max_concurrent, 4);
    }

    #[test]
    fn test_merge_with_args_overrides_file_values() {
        let mut config = AppConfig::default();
        let args = CliArgs::parse_from([
            "travelog-images",
            "--scale",
            "3",
            "--cache-dir",
            "/var/cache/x",
            "--log-level",
            "trace",
            "clear",
        ]);

        config.merge_with_args(&args);

        assert!((config.display.scale - 3.0).abs() < f32::EPSILON);
        assert_eq!(config.cache.disk_dir, Some(PathBuf::from("/var/cache/x")));
        assert_eq!(config.log_level, LogLevel::Trace);
        assert_eq!(config.network.timeout_secs, 30);
    }
}
