//! Application configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{
    AppConfig, CacheConfig, DisplayConfig, LogLevel, NetworkConfig, PrefetchConfig,
};
pub use args::{CliArgs, Command, SizeArgs};
pub use storage::{ConfigError, StorageManager};
