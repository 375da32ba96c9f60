// Configuration management module
// Handles TOML configuration loading, validation and defaults

pub mod settings;


pub use settings::{Config, ConfigError, IndexConfig, RankingConfig};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_base_dir()
}
