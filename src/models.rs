//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the documents, chunks, embedded records and
//! search hits that flow from the loader through the index to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Supported source formats, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Pdf,
    Txt,
    Md,
}

impl SourceType {
    /// Map a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(SourceType::Pdf),
            "txt" => Some(SourceType::Txt),
            "md" | "markdown" => Some(SourceType::Md),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "PDF",
            SourceType::Txt => "TXT",
            SourceType::Md => "MD",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw loaded content before chunking. Not persisted.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub source_path: String,
    pub filename: String,
    pub source_type: SourceType,
}

/// A bounded segment of a document's text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub filename: String,
    pub source_path: String,
    pub source_type: SourceType,
    pub chunk_index: usize,
    pub chunk_count: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk plus its vector, as stored in the index.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: String,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// One ranked retrieval result. Higher `score` means more similar.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Whether an index currently holds a searchable structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Initialized,
    NotInitialized,
}

/// Summary of an index, mirroring the persisted metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub status: IndexStatus,
    /// Number of stored records (chunks).
    pub document_count: usize,
    pub embedding_model: Option<String>,
}
