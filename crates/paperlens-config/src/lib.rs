//! Configuration loading for paperlens.
//! Reads paperlens.toml from the current directory or the path in the PAPERLENS_CONFIG env var.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_ENV: &str = "PAPERLENS_CONFIG";
pub const CONFIG_FILE: &str = "paperlens.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_store_path() -> String { "./data/paperlens.db".to_string() }
fn default_table()      -> String { "documents".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path(), table: default_table() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Worker count used when an algorithm module declares none.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pool size for decoding and aggregating stored vectors.
    #[serde(default = "default_read_workers")]
    pub read_workers: usize,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
fn default_read_workers()      -> usize { 8 }
fn default_progress_interval() -> usize { 500 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            read_workers: default_read_workers(),
            progress_interval: default_progress_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

fn default_ttl_hours() -> u64 { 12 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_hours: default_ttl_hours() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Directory holding the fine-tuned section classifier
    /// (config.json, tokenizer.json, model.safetensors).
    pub model_path: Option<String>,
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f32,
    /// JSON file with labels, keywords, priors and position curves.
    pub reference_path: Option<String>,
}

fn default_acceptance_threshold() -> f32 { 0.9 }

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            acceptance_threshold: default_acceptance_threshold(),
            reference_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_model")]
    pub model_id: String,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub use_gpu: bool,
    /// Accelerator devices available to affinity pools.
    #[serde(default = "default_devices")]
    pub devices: usize,
}

fn default_embed_model() -> String { "sentence-transformers/all-MiniLM-L6-v2".to_string() }
fn default_max_length()  -> usize  { 512 }
fn default_batch_size()  -> usize  { 32 }
fn default_devices()     -> usize  { 1 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: default_embed_model(),
            max_length: default_max_length(),
            batch_size: default_batch_size(),
            use_gpu: false,
            devices: default_devices(),
        }
    }
}

impl Config {
    /// Load from `$PAPERLENS_CONFIG`, falling back to `./paperlens.toml`.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.dispatch.read_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.read_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.classifier.acceptance_threshold) {
            return Err(ConfigError::Invalid {
                field: "classifier.acceptance_threshold",
                reason: format!("{} is outside [0, 1]", self.classifier.acceptance_threshold),
            });
        }
        if self.embedding.devices == 0 {
            return Err(ConfigError::Invalid {
                field: "embedding.devices",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.store.table, "documents");
        assert_eq!(config.cache.ttl_hours, 12);
        assert!((config.classifier.acceptance_threshold - 0.9).abs() < 1e-6);
        assert!(config.dispatch.workers >= 1);
    }

    #[test]
    fn test_partial_tables_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [dispatch]
            workers = 3

            [classifier]
            model_path = "/models/sections"
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatch.workers, 3);
        assert_eq!(config.dispatch.read_workers, 8);
        assert_eq!(config.classifier.model_path.as_deref(), Some("/models/sections"));
        assert_eq!(config.embedding.batch_size, 32);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::from_toml("[dispatch]\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "dispatch.workers", .. }));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let err = Config::from_toml("[classifier]\nacceptance_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_path(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[store]\npath = \"/tmp/papers\"\n").unwrap();
        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.store.path, "/tmp/papers");
    }
}
