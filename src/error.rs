//! Error taxonomy for the retrieval core.
//!
//! Per-file failures ([`LoadError`]) are contained by the loader: the file
//! is logged and skipped. Whole-batch failures ([`IndexError`]) are
//! surfaced to the caller, which keeps its previous index. Configuration
//! problems ([`ConfigError`]) are fatal at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid configuration. Never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_size must be > 0")]
    ZeroChunkSize,

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Failure to turn one source file into a [`Document`](crate::models::Document).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8 (invalid byte at offset {valid_up_to})")]
    Decode { path: PathBuf, valid_up_to: usize },

    #[error("PDF extraction failed for {path}: {reason}")]
    Pdf { path: PathBuf, reason: String },

    #[error("unsupported file type: {path}")]
    Unsupported { path: PathBuf },
}

/// Failure of a whole-index operation (build, add, persist, reload).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot build an index from an empty chunk list")]
    EmptyBatch,

    #[error("index build failed: {0}")]
    Build(String),

    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("embedding model mismatch: index built with '{stored}', embedder is '{current}'")]
    ModelMismatch { stored: String, current: String },

    #[error("index build cancelled")]
    Cancelled,

    #[error("failed to persist index to {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// A persisted generation disagrees with its metadata.
    #[error("persisted index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;
