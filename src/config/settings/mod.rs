
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_DIMENSION: usize = 768;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MAX_RESULTS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Overrides where the vector and metadata artifacts are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub dimension: usize,
    pub default_top_k: usize,
    pub similarity_threshold: f32,
    pub max_results: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            default_top_k: DEFAULT_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RankingConfig {
    /// Characters kept from a chunk when it is shown as document evidence
    pub evidence_preview_chars: usize,
    /// Characters kept from a chunk when it is listed as an answer source
    pub context_preview_chars: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            evidence_preview_chars: 150,
            context_preview_chars: 100,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid vector dimension: {0} (must be between 1 and 8192)")]
    InvalidDimension(usize),
    #[error("Invalid default top_k: {0} (must be between 1 and 1000)")]
    InvalidTopK(usize),
    #[error("Invalid similarity threshold: {0} (must be between -1.0 and 1.0)")]
    InvalidThreshold(f32),
    #[error("Invalid max results: {0} (must be between 1 and 1000)")]
    InvalidMaxResults(usize),
    #[error("Max results ({0}) must not be smaller than default top_k ({1})")]
    MaxResultsTooSmall(usize, usize),
    #[error("Invalid preview length: {0} (must be between 1 and 10000)")]
    InvalidPreviewLength(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration rooted at `base_dir`
    #[inline]
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            data_dir: None,
            index: IndexConfig::default(),
            ranking: RankingConfig::default(),
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// The directory used when no explicit one is given: `~/.docvec`
    #[inline]
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".docvec"))
            .or({
                #[cfg(windows)]
                {
                    dirs::data_dir().map(|data| data.join("docvec"))
                }
                #[cfg(not(windows))]
                {
                    None
                }
            })
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self::new(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.index.validate()?;
        self.ranking.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Directory holding the vector and metadata artifacts
    #[inline]
    pub fn data_dir_path(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("data"))
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=8192).contains(&self.dimension) {
            return Err(ConfigError::InvalidDimension(self.dimension));
        }

        if !(1..=1000).contains(&self.default_top_k) {
            return Err(ConfigError::InvalidTopK(self.default_top_k));
        }

        if !self.similarity_threshold.is_finite()
            || !(-1.0..=1.0).contains(&self.similarity_threshold)
        {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }

        if !(1..=1000).contains(&self.max_results) {
            return Err(ConfigError::InvalidMaxResults(self.max_results));
        }

        if self.max_results < self.default_top_k {
            return Err(ConfigError::MaxResultsTooSmall(
                self.max_results,
                self.default_top_k,
            ));
        }

        Ok(())
    }

    pub fn set_dimension(&mut self, dimension: usize) -> Result<(), ConfigError> {
        if !(1..=8192).contains(&dimension) {
            return Err(ConfigError::InvalidDimension(dimension));
        }
        self.dimension = dimension;
        Ok(())
    }

    pub fn set_default_top_k(&mut self, top_k: usize) -> Result<(), ConfigError> {
        let temp_config = IndexConfig {
            default_top_k: top_k,
            ..self.clone()
        };
        temp_config.validate()?;
        self.default_top_k = top_k;
        Ok(())
    }

    pub fn set_similarity_threshold(&mut self, threshold: f32) -> Result<(), ConfigError> {
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        self.similarity_threshold = threshold;
        Ok(())
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for length in [self.evidence_preview_chars, self.context_preview_chars] {
            if !(1..=10_000).contains(&length) {
                return Err(ConfigError::InvalidPreviewLength(length));
            }
        }
        Ok(())
    }
}
