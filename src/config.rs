//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so an empty file (or [`Config::default`])
//! yields a working offline setup. A handful of environment variables
//! override the file: `KNOWLEDGE_BASE_PATH`, `VECTOR_DB_PATH`,
//! `CHUNK_SIZE` and `CHUNK_OVERLAP`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::Chunker;
use crate::error::ConfigError;
use crate::index::{Metric, ModelMismatchPolicy};
use crate::loader::ScanOptions;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl ChunkingConfig {
    pub fn chunker(&self) -> Result<Chunker, ConfigError> {
        Chunker::new(self.chunk_size, self.chunk_overlap)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub model_mismatch: ModelMismatchPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            model_mismatch: ModelMismatchPolicy::default(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_knowledge_base")]
    pub knowledge_base: PathBuf,
    #[serde(default = "default_index_storage")]
    pub index_storage: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            knowledge_base: default_knowledge_base(),
            index_storage: default_index_storage(),
        }
    }
}

fn default_knowledge_base() -> PathBuf {
    PathBuf::from("./knowledge_base")
}
fn default_index_storage() -> PathBuf {
    PathBuf::from("./vector_db")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub metric: Metric,
    /// Abort a rebuild after this many seconds. `0` disables the limit.
    #[serde(default)]
    pub build_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoaderConfig {
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl LoaderConfig {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            include_globs: self.include_globs.clone(),
            exclude_globs: self.exclude_globs.clone(),
            follow_symlinks: self.follow_symlinks,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Create the knowledge base and index storage directories if missing.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.paths.knowledge_base, &self.paths.index_storage] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Apply environment overrides on top of file values.
    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("KNOWLEDGE_BASE_PATH") {
            self.paths.knowledge_base = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("VECTOR_DB_PATH") {
            self.paths.index_storage = PathBuf::from(path);
        }
        if let Ok(size) = std::env::var("CHUNK_SIZE") {
            self.chunking.chunk_size = size
                .parse()
                .with_context(|| format!("CHUNK_SIZE is not an integer: {}", size))?;
        }
        if let Ok(overlap) = std::env::var("CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = overlap
                .parse()
                .with_context(|| format!("CHUNK_OVERLAP is not an integer: {}", overlap))?;
        }
        Ok(())
    }

    /// Check cross-field constraints. Chunking errors surface as [`ConfigError`].
    pub fn validate(&self) -> Result<()> {
        self.chunking.chunker()?;

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                key: "retrieval.top_k".to_string(),
                reason: "must be >= 1".to_string(),
            }
            .into());
        }

        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "embedding.batch_size".to_string(),
                reason: "must be >= 1".to_string(),
            }
            .into());
        }

        match self.embedding.provider.as_str() {
            "hash" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
                other
            ),
        }

        if matches!(self.embedding.provider.as_str(), "openai" | "ollama") {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        Ok(())
    }
}

/// Parse a TOML string, without environment overrides.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path`, apply environment overrides and validate.
///
/// A missing file falls back to defaults so the CLI works out of the box.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.index.metric, Metric::Cosine);
        assert_eq!(config.embedding.model_mismatch, ModelMismatchPolicy::Warn);
        assert_eq!(config.paths.index_storage, PathBuf::from("./vector_db"));
    }

    #[test]
    fn test_full_file() {
        let config = parse_config(
            r#"
            [chunking]
            chunk_size = 500
            chunk_overlap = 50

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 768
            model_mismatch = "refuse"

            [paths]
            knowledge_base = "/data/kb"
            index_storage = "/data/index"

            [index]
            metric = "l2"
            build_timeout_secs = 120

            [retrieval]
            top_k = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.embedding.model_mismatch, ModelMismatchPolicy::Refuse);
        assert_eq!(config.index.metric, Metric::L2);
        assert_eq!(config.index.build_timeout_secs, 120);
        assert_eq!(config.paths.knowledge_base, PathBuf::from("/data/kb"));
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        let err = parse_config("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::OverlapTooLarge {
                size: 100,
                overlap: 100
            })
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        assert!(parse_config("[embedding]\nprovider = \"openai\"\ndims = 1536\n").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").is_err());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").is_err());
    }
}
