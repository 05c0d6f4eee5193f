#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::chunker::ChunkerConfig;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid chunk size: {0} (must be between 100 and 4096)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid max chunks: {0} (must be between 1 and 1000)")]
    InvalidMaxChunks(usize),
    #[error("Invalid minimum chunk length: {0} (must be between 1 and 512)")]
    InvalidMinChunkLen(usize),
    #[error("Invalid content limit: {0} (must be at least 1024 bytes)")]
    InvalidContentLimit(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub managed_store: ManagedStoreConfig,
    pub live_search: LiveSearchConfig,
    pub chunking: ChunkerConfig,
    pub limits: LimitsConfig,
    /// Override for the config/database directory, used by tests
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text:latest".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid embedding endpoint: {}", self.endpoint))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8080".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedStoreConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ManagedStoreConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8081".to_string(),
            api_key: None,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSearchConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for LiveSearchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8082".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Oversize payloads are rejected before any processing
    pub max_content_bytes: usize,
}

impl Default for LimitsConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_content_bytes: 2_000_000,
        }
    }
}

impl Config {
    /// Load configuration from the config directory, falling back to
    /// defaults when no file exists yet
    #[inline]
    pub fn load() -> Result<Self> {
        let config_path = get_config_dir()?.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()?;

        let config_dir = self.config_dir_path()?;
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.endpoint_url().map_err(|_| {
            ConfigError::InvalidUrl(self.embedding.endpoint.clone())
        })?;
        Url::parse(&self.generation.endpoint)
            .map_err(|_| ConfigError::InvalidUrl(self.generation.endpoint.clone()))?;
        Url::parse(&self.managed_store.endpoint)
            .map_err(|_| ConfigError::InvalidUrl(self.managed_store.endpoint.clone()))?;
        Url::parse(&self.live_search.endpoint)
            .map_err(|_| ConfigError::InvalidUrl(self.live_search.endpoint.clone()))?;

        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding.model.clone()));
        }
        if self.generation.enabled && self.generation.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.generation.model.clone()));
        }

        for timeout in [
            self.embedding.timeout_seconds,
            self.generation.timeout_seconds,
            self.managed_store.timeout_seconds,
            self.live_search.timeout_seconds,
        ] {
            if timeout == 0 || timeout > 600 {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }

        let chunking = &self.chunking;
        if chunking.chunk_size < 100 || chunking.chunk_size > 4096 {
            return Err(ConfigError::InvalidChunkSize(chunking.chunk_size));
        }
        if chunking.overlap >= chunking.chunk_size {
            return Err(ConfigError::OverlapTooLarge(chunking.overlap, chunking.chunk_size));
        }
        if chunking.max_chunks == 0 || chunking.max_chunks > 1000 {
            return Err(ConfigError::InvalidMaxChunks(chunking.max_chunks));
        }
        if chunking.min_chunk_len == 0 || chunking.min_chunk_len > 512 {
            return Err(ConfigError::InvalidMinChunkLen(chunking.min_chunk_len));
        }

        if self.limits.max_content_bytes < 1024 {
            return Err(ConfigError::InvalidContentLimit(self.limits.max_content_bytes));
        }

        Ok(())
    }

    #[inline]
    pub fn config_dir_path(&self) -> Result<PathBuf> {
        match &self.base_dir {
            Some(dir) => Ok(dir.clone()),
            None => get_config_dir(),
        }
    }

    #[inline]
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.config_dir_path()?.join("notebooks.db"))
    }
}

#[inline]
pub fn get_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or(ConfigError::DirectoryError)?;
    Ok(base.join("notebook-qa"))
}

/// Print the active configuration to stdout
#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load()?;
    let rendered = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("{rendered}");
    Ok(())
}
