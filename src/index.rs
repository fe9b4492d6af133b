//! Embedding index: embedded chunk records plus a vector backend.
//!
//! An [`EmbeddingIndex`] owns an ordered list of records (id + chunk), a
//! [`VectorBackend`] holding one vector per record, and the name of the
//! embedding model that produced them. Insertion order is the tie-break
//! order for equal scores.
//!
//! # Persistence Layout
//!
//! ```text
//! <root>/
//! ├── faiss_index/
//! │   ├── vectors.bin      # little-endian f32, row-major
//! │   └── docstore.json    # {dims, records: [{id, chunk}]}
//! └── metadata.pkl         # JSON {embedding_model, document_count, dims,
//!                          #       checksum, format_version, created_at}
//! ```
//!
//! A new generation is written to a temporary directory, the previous one
//! is moved to `faiss_index.bak` (only if it matches the current metadata;
//! an unconfirmed leftover is discarded instead), the new one renamed into
//! place, and the metadata replaced last. The metadata checksum covers both files, so a
//! crash at any step leaves either `faiss_index` or `faiss_index.bak`
//! matching the metadata on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embedding::{
    blob_to_vec, cosine_similarity, embed_query, l2_distance, vec_to_blob, Embedder,
};
use crate::error::{IndexError, IndexResult};
use crate::models::{Chunk, EmbeddingRecord, IndexStats, IndexStatus, SearchHit};

pub const INDEX_DIR: &str = "faiss_index";
pub const BACKUP_DIR: &str = "faiss_index.bak";
pub const METADATA_FILE: &str = "metadata.pkl";
const VECTORS_FILE: &str = "vectors.bin";
const DOCSTORE_FILE: &str = "docstore.json";
const FORMAT_VERSION: u32 = 1;

/// Similarity measure used for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity, higher is closer.
    #[default]
    Cosine,
    /// Euclidean distance, reported as a negated score so higher is still closer.
    L2,
}

/// What to do when a persisted index was built with a different model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMismatchPolicy {
    /// Log a compatibility warning and keep going.
    #[default]
    Warn,
    /// Reject: reload returns false and `add` fails.
    Refuse,
}

/// Storage and nearest-neighbour search over vectors addressed by position.
pub trait VectorBackend: Send + Sync {
    fn metric(&self) -> Metric;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, vector: Vec<f32>);

    fn vector(&self, position: usize) -> Option<&[f32]>;

    /// Up to `k` `(position, score)` pairs, best first, ties by position.
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)>;

    fn clone_box(&self) -> Box<dyn VectorBackend>;
}

/// Exact brute-force backend.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            vectors: Vec::new(),
        }
    }

    fn score(&self, query: &[f32], vector: &[f32]) -> f32 {
        match self.metric {
            Metric::Cosine => cosine_similarity(query, vector),
            Metric::L2 => -l2_distance(query, vector),
        }
    }
}

impl VectorBackend for FlatIndex {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn push(&mut self, vector: Vec<f32>) {
        self.vectors.push(vector);
    }

    fn vector(&self, position: usize) -> Option<&[f32]> {
        self.vectors.get(position).map(Vec::as_slice)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, self.score(query, vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores; NaN ranks last.
        scored.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
            (false, false) => b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal),
            (a_nan, b_nan) => a_nan.cmp(&b_nan),
        });
        scored.truncate(k);
        scored
    }

    fn clone_box(&self) -> Box<dyn VectorBackend> {
        Box::new(self.clone())
    }
}

/// Index construction options.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub metric: Metric,
    /// Number of chunks sent to the embedder per call.
    pub batch_size: usize,
    pub model_mismatch: ModelMismatchPolicy,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            metric: Metric::default(),
            batch_size: 64,
            model_mismatch: ModelMismatchPolicy::default(),
        }
    }
}

impl IndexOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            metric: config.index.metric,
            batch_size: config.embedding.batch_size.max(1),
            model_mismatch: config.embedding.model_mismatch,
        }
    }
}

/// The persisted metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub embedding_model: String,
    pub document_count: usize,
    pub dims: usize,
    pub checksum: String,
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: String,
    chunk: Chunk,
}

#[derive(Debug, Serialize, Deserialize)]
struct Docstore {
    dims: usize,
    records: Vec<StoredRecord>,
}

/// Embedded chunks plus the vector structure searched at query time.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    records: Vec<StoredRecord>,
    backend: Box<dyn VectorBackend>,
    /// Model that produced the stored vectors; `None` while uninitialized.
    built_with: Option<String>,
    dims: usize,
}

impl Clone for EmbeddingIndex {
    fn clone(&self) -> Self {
        Self {
            embedder: Arc::clone(&self.embedder),
            options: self.options.clone(),
            records: self.records.clone(),
            backend: self.backend.clone_box(),
            built_with: self.built_with.clone(),
            dims: self.dims,
        }
    }
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("records", &self.records.len())
            .field("built_with", &self.built_with)
            .field("dims", &self.dims)
            .field("metric", &self.options.metric)
            .finish()
    }
}

impl EmbeddingIndex {
    /// Create an uninitialized index bound to `embedder`.
    pub fn new(embedder: Arc<dyn Embedder>, options: IndexOptions) -> Self {
        let backend = Box::new(FlatIndex::new(options.metric));
        Self {
            embedder,
            options,
            records: Vec::new(),
            backend,
            built_with: None,
            dims: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.built_with.is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.built_with.as_deref()
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Chunks in insertion order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.records.iter().map(|r| &r.chunk)
    }

    /// Build a fresh index from `chunks`, replacing any prior contents.
    ///
    /// Prior contents are untouched unless every chunk embedded successfully.
    pub async fn create(&mut self, chunks: Vec<Chunk>, cancel: &CancellationToken) -> IndexResult<()> {
        if chunks.is_empty() {
            return Err(IndexError::EmptyBatch);
        }

        let embedded = self.embed_chunks(chunks, cancel).await?;
        let dims = embedded.first().map(|r| r.vector.len()).unwrap_or(0);

        let mut backend: Box<dyn VectorBackend> = Box::new(FlatIndex::new(self.options.metric));
        let mut records = Vec::with_capacity(embedded.len());
        for record in embedded {
            backend.push(record.vector);
            records.push(StoredRecord {
                id: record.id,
                chunk: record.chunk,
            });
        }

        self.records = records;
        self.backend = backend;
        self.dims = dims;
        self.built_with = Some(self.embedder.model_name().to_string());

        tracing::info!(
            records = self.records.len(),
            dims,
            model = self.embedder.model_name(),
            "created index"
        );
        Ok(())
    }

    /// Embed and append `chunks`. Existing records are not re-embedded.
    pub async fn add(&mut self, chunks: Vec<Chunk>, cancel: &CancellationToken) -> IndexResult<()> {
        if chunks.is_empty() {
            tracing::warn!("no chunks to add");
            return Ok(());
        }

        let Some(stored) = self.built_with.clone() else {
            return self.create(chunks, cancel).await;
        };

        let current = self.embedder.model_name();
        if stored != current {
            match self.options.model_mismatch {
                ModelMismatchPolicy::Warn => tracing::warn!(
                    stored = %stored,
                    current,
                    "adding to an index built with a different embedding model"
                ),
                ModelMismatchPolicy::Refuse => {
                    return Err(IndexError::ModelMismatch {
                        stored,
                        current: current.to_string(),
                    })
                }
            }
        }

        let embedded = self.embed_chunks(chunks, cancel).await?;
        if let Some(record) = embedded.iter().find(|r| r.vector.len() != self.dims) {
            return Err(IndexError::Build(format!(
                "vector dimension {} does not match index dimension {}",
                record.vector.len(),
                self.dims
            )));
        }

        let added = embedded.len();
        for record in embedded {
            self.backend.push(record.vector);
            self.records.push(StoredRecord {
                id: record.id,
                chunk: record.chunk,
            });
        }

        tracing::info!(added, total = self.records.len(), "added chunks to index");
        Ok(())
    }

    /// Embed chunks in `batch_size` batches, preserving input order.
    async fn embed_chunks(
        &self,
        chunks: Vec<Chunk>,
        cancel: &CancellationToken,
    ) -> IndexResult<Vec<EmbeddingRecord>> {
        let expected_dims = self.embedder.dims();
        let mut records = Vec::with_capacity(chunks.len());
        let mut pending = chunks.into_iter().peekable();

        while pending.peek().is_some() {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }

            let batch: Vec<Chunk> = pending.by_ref().take(self.options.batch_size.max(1)).collect();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let vectors = tokio::select! {
                _ = cancel.cancelled() => return Err(IndexError::Cancelled),
                result = self.embedder.embed(&texts) => result.map_err(IndexError::Embedding)?,
            };

            if vectors.len() != batch.len() {
                return Err(IndexError::Build(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (chunk, vector) in batch.into_iter().zip(vectors) {
                if vector.len() != expected_dims {
                    return Err(IndexError::Build(format!(
                        "embedder returned a {}-dimensional vector, expected {}",
                        vector.len(),
                        expected_dims
                    )));
                }
                records.push(EmbeddingRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    chunk,
                    vector,
                });
            }
            tracing::debug!(embedded = records.len(), "embedded batch");
        }

        Ok(records)
    }

    /// Rank stored chunks against `query`. Never fails: problems yield an
    /// empty result and a log line.
    pub async fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        if k == 0 {
            tracing::warn!("search called with k = 0");
            return Vec::new();
        }
        if !self.is_initialized() || self.records.is_empty() {
            tracing::debug!("search on an empty index");
            return Vec::new();
        }

        let query_vec = match embed_query(self.embedder.as_ref(), query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed");
                return Vec::new();
            }
        };
        if query_vec.len() != self.dims {
            tracing::warn!(
                query_dims = query_vec.len(),
                index_dims = self.dims,
                "query dimension does not match index"
            );
            return Vec::new();
        }

        self.backend
            .search(&query_vec, k)
            .into_iter()
            .filter_map(|(position, score)| {
                self.records.get(position).map(|r| SearchHit {
                    chunk: r.chunk.clone(),
                    score,
                })
            })
            .collect()
    }

    /// Write the index under `root`. An uninitialized index is not written.
    pub fn persist(&self, root: &Path) -> IndexResult<()> {
        let Some(model) = self.built_with.as_ref() else {
            tracing::warn!("no index to persist");
            return Ok(());
        };

        std::fs::create_dir_all(root).map_err(|e| persistence(root, e))?;

        let mut vectors = Vec::with_capacity(self.records.len() * self.dims * 4);
        for position in 0..self.backend.len() {
            if let Some(vector) = self.backend.vector(position) {
                vectors.extend_from_slice(&vec_to_blob(vector));
            }
        }
        let docstore = serde_json::to_vec_pretty(&Docstore {
            dims: self.dims,
            records: self.records.clone(),
        })?;

        let tmp_dir = root.join(format!("{}.tmp-{}", INDEX_DIR, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&tmp_dir).map_err(|e| persistence(&tmp_dir, e))?;
        write_file(&tmp_dir.join(VECTORS_FILE), &vectors)?;
        write_file(&tmp_dir.join(DOCSTORE_FILE), &docstore)?;

        let metadata = IndexMetadata {
            embedding_model: model.clone(),
            document_count: self.records.len(),
            dims: self.dims,
            checksum: checksum(&vectors, &docstore),
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
        };

        let index_dir = root.join(INDEX_DIR);
        let backup_dir = root.join(BACKUP_DIR);

        // Only the generation matching the current metadata may become the
        // backup. A live directory left by an earlier failed persist is
        // unconfirmed and is dropped so the existing backup survives.
        if index_dir.exists() {
            let live_confirmed = read_metadata(&root.join(METADATA_FILE))
                .map(|current| generation_matches(&index_dir, &current))
                .unwrap_or(false);
            if live_confirmed {
                if backup_dir.exists() {
                    std::fs::remove_dir_all(&backup_dir).map_err(|e| persistence(&backup_dir, e))?;
                }
                std::fs::rename(&index_dir, &backup_dir).map_err(|e| persistence(&index_dir, e))?;
            } else {
                tracing::warn!(
                    path = %index_dir.display(),
                    "discarding unconfirmed index generation"
                );
                std::fs::remove_dir_all(&index_dir).map_err(|e| persistence(&index_dir, e))?;
            }
        }
        std::fs::rename(&tmp_dir, &index_dir).map_err(|e| persistence(&index_dir, e))?;

        let metadata_path = root.join(METADATA_FILE);
        let metadata_tmp = root.join(format!("{}.tmp", METADATA_FILE));
        write_file(&metadata_tmp, &serde_json::to_vec_pretty(&metadata)?)?;
        std::fs::rename(&metadata_tmp, &metadata_path).map_err(|e| persistence(&metadata_path, e))?;

        if backup_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&backup_dir) {
                tracing::warn!(path = %backup_dir.display(), error = %e, "failed to remove index backup");
            }
        }

        tracing::info!(
            path = %root.display(),
            records = metadata.document_count,
            "persisted index"
        );
        Ok(())
    }

    /// Load a persisted index from `root`, replacing in-memory contents.
    ///
    /// Returns `false` (leaving the index untouched) when nothing valid is
    /// found or the model-mismatch policy refuses the stored index.
    pub fn reload(&mut self, root: &Path) -> bool {
        let metadata_path = root.join(METADATA_FILE);
        let has_generation = root.join(INDEX_DIR).exists() || root.join(BACKUP_DIR).exists();
        if !metadata_path.exists() || !has_generation {
            tracing::info!(path = %root.display(), "no persisted index found");
            return false;
        }

        let metadata = match read_metadata(&metadata_path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %metadata_path.display(), error = %e, "unreadable index metadata");
                return false;
            }
        };

        if metadata.format_version != FORMAT_VERSION {
            tracing::warn!(
                found = metadata.format_version,
                expected = FORMAT_VERSION,
                "unsupported index format version"
            );
            return false;
        }

        let current = self.embedder.model_name();
        if metadata.embedding_model != current {
            match self.options.model_mismatch {
                ModelMismatchPolicy::Warn => tracing::warn!(
                    stored = %metadata.embedding_model,
                    current,
                    "index was built with a different embedding model; results may be degraded"
                ),
                ModelMismatchPolicy::Refuse => {
                    tracing::warn!(
                        stored = %metadata.embedding_model,
                        current,
                        "refusing index built with a different embedding model"
                    );
                    return false;
                }
            }
        }

        for dir in [root.join(INDEX_DIR), root.join(BACKUP_DIR)] {
            if !dir.exists() {
                continue;
            }
            match load_generation(&dir, &metadata) {
                Ok((records, vectors)) => {
                    let mut backend: Box<dyn VectorBackend> =
                        Box::new(FlatIndex::new(self.options.metric));
                    for vector in vectors {
                        backend.push(vector);
                    }
                    self.records = records;
                    self.backend = backend;
                    self.dims = metadata.dims;
                    self.built_with = Some(metadata.embedding_model.clone());
                    tracing::info!(
                        path = %dir.display(),
                        records = self.records.len(),
                        "loaded index"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "rejecting index generation");
                }
            }
        }

        false
    }

    /// Clear the index and remove its persisted files. Failures are logged.
    pub fn delete(&mut self, root: &Path) {
        self.records.clear();
        self.backend = Box::new(FlatIndex::new(self.options.metric));
        self.built_with = None;
        self.dims = 0;

        for dir in [root.join(INDEX_DIR), root.join(BACKUP_DIR)] {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    tracing::error!(path = %dir.display(), error = %e, "failed to delete index directory");
                }
            }
        }
        let metadata_path = root.join(METADATA_FILE);
        if metadata_path.exists() {
            if let Err(e) = std::fs::remove_file(&metadata_path) {
                tracing::error!(path = %metadata_path.display(), error = %e, "failed to delete index metadata");
            }
        }
        tracing::info!(path = %root.display(), "deleted index");
    }

    pub fn stats(&self) -> IndexStats {
        match &self.built_with {
            Some(model) => IndexStats {
                status: IndexStatus::Initialized,
                document_count: self.records.len(),
                embedding_model: Some(model.clone()),
            },
            None => IndexStats {
                status: IndexStatus::NotInitialized,
                document_count: 0,
                embedding_model: None,
            },
        }
    }
}

fn load_generation(
    dir: &Path,
    metadata: &IndexMetadata,
) -> Result<(Vec<StoredRecord>, Vec<Vec<f32>>), IndexError> {
    let vectors_bytes = std::fs::read(dir.join(VECTORS_FILE))?;
    let docstore_bytes = std::fs::read(dir.join(DOCSTORE_FILE))?;

    if checksum(&vectors_bytes, &docstore_bytes) != metadata.checksum {
        return Err(corrupt(dir, "checksum does not match metadata".to_string()));
    }

    let docstore: Docstore = serde_json::from_slice(&docstore_bytes)?;
    if docstore.dims != metadata.dims || docstore.records.len() != metadata.document_count {
        return Err(corrupt(dir, "docstore does not match metadata".to_string()));
    }
    if docstore.dims == 0 || vectors_bytes.len() != docstore.records.len() * docstore.dims * 4 {
        return Err(corrupt(
            dir,
            format!(
                "vector file holds {} bytes, expected {} records of {} dimensions",
                vectors_bytes.len(),
                docstore.records.len(),
                docstore.dims
            ),
        ));
    }

    let vectors = vectors_bytes
        .chunks_exact(docstore.dims * 4)
        .map(blob_to_vec)
        .collect();
    Ok((docstore.records, vectors))
}

/// Whether the generation in `dir` is the one `metadata` describes.
fn generation_matches(dir: &Path, metadata: &IndexMetadata) -> bool {
    match (
        std::fs::read(dir.join(VECTORS_FILE)),
        std::fs::read(dir.join(DOCSTORE_FILE)),
    ) {
        (Ok(vectors), Ok(docstore)) => checksum(&vectors, &docstore) == metadata.checksum,
        _ => false,
    }
}

fn read_metadata(path: &Path) -> IndexResult<IndexMetadata> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn checksum(vectors: &[u8], docstore: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vectors);
    hasher.update(docstore);
    format!("{:x}", hasher.finalize())
}

fn write_file(path: &Path, bytes: &[u8]) -> IndexResult<()> {
    std::fs::write(path, bytes).map_err(|e| persistence(path, e))
}

fn corrupt(dir: &Path, reason: String) -> IndexError {
    IndexError::Corrupt {
        path: PathBuf::from(dir),
        reason,
    }
}

fn persistence(path: &Path, error: std::io::Error) -> IndexError {
    IndexError::Persistence {
        path: PathBuf::from(path),
        reason: error.to_string(),
    }
}
