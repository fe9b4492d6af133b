//! Retrieval orchestrator: owns the live index and coordinates rebuilds.
//!
//! [`KnowledgeBase`] ties the loader, chunker and [`EmbeddingIndex`]
//! together behind the operations callers use: load or rebuild the
//! knowledge base, add documents, retrieve context, answer a question.
//!
//! # Concurrency
//!
//! Readers take an `Arc` snapshot of the current index and search it
//! without holding any lock, so a rebuild never blocks retrieval. Writers
//! (rebuild, add) are serialised by an async mutex and build their new
//! index off to the side; the snapshot is swapped only once the build
//! succeeded. A failed, cancelled or timed-out rebuild leaves the previous
//! snapshot in place.
//!
//! # States
//!
//! ```text
//!            load/rebuild ok            mark_stale
//!   Empty ─────────────────▶ Loaded ─────────────▶ Stale
//!                              ▲                     │
//!                              └─────────────────────┘
//!                                  update ok
//! ```

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::ConfigError;
use crate::index::{EmbeddingIndex, IndexOptions};
use crate::loader::{load_document, scan_directory};
use crate::models::{IndexStats, SearchHit, SourceType};

/// Lifecycle of the served index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KbState {
    /// No index loaded.
    Empty,
    /// An index is loaded and believed current.
    Loaded,
    /// An index is loaded but the corpus has changed since.
    Stale,
}

/// Index statistics plus the orchestrator state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeBaseStats {
    pub state: KbState,
    #[serde(flatten)]
    pub index: IndexStats,
}

/// Citation for one retrieved chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub filename: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub chunk_index: usize,
}

/// Result of [`KnowledgeBase::answer_question`].
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Distinct sources in retrieval order.
    pub sources: Vec<SourceRef>,
    pub context_count: usize,
    pub question: String,
}

/// Turns a question plus retrieved context into answer text.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, context: &[SearchHit]) -> anyhow::Result<String>;
}

/// Offline generator that answers with the retrieved passages themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextOnlyGenerator;

pub const NO_CONTEXT_ANSWER: &str =
    "I don't have enough information in my knowledge base to answer that question.";

#[async_trait]
impl AnswerGenerator for ContextOnlyGenerator {
    async fn generate(&self, _question: &str, context: &[SearchHit]) -> anyhow::Result<String> {
        if context.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let mut filenames: Vec<&str> = Vec::new();
        for hit in context {
            if !filenames.contains(&hit.chunk.filename.as_str()) {
                filenames.push(&hit.chunk.filename);
            }
        }

        Ok(format!(
            "Based on the information in my knowledge base, here's what I found:\n\n{}\n\n\
             Sources: {}",
            format_context(context),
            filenames.join(", ")
        ))
    }
}

/// Render hits as `Source: <filename>\n<text>` blocks separated by blank lines.
pub fn format_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("Source: {}\n{}", hit.chunk.filename, hit.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct `(filename, type, chunk_index)` triples, first occurrence wins.
fn collect_sources(hits: &[SearchHit]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for hit in hits {
        let source = SourceRef {
            filename: hit.chunk.filename.clone(),
            source_type: hit.chunk.source_type,
            chunk_index: hit.chunk.chunk_index,
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

/// The retrieval core: a served index snapshot plus the machinery to rebuild it.
pub struct KnowledgeBase {
    config: Config,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    snapshot: RwLock<Arc<EmbeddingIndex>>,
    state: RwLock<KbState>,
    rebuild_lock: tokio::sync::Mutex<()>,
    build_cancel: Mutex<CancellationToken>,
}

impl KnowledgeBase {
    /// Build from configuration, constructing the configured embedder.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::with_embedder(config, embedder)?)
    }

    /// Build with an explicit embedder.
    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self, ConfigError> {
        let chunker = config.chunking.chunker()?;
        let empty = EmbeddingIndex::new(Arc::clone(&embedder), IndexOptions::from_config(&config));
        Ok(Self {
            config,
            embedder,
            chunker,
            snapshot: RwLock::new(Arc::new(empty)),
            state: RwLock::new(KbState::Empty),
            rebuild_lock: tokio::sync::Mutex::new(()),
            build_cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> KbState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The index currently served to readers.
    pub fn snapshot(&self) -> Arc<EmbeddingIndex> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Caller-driven staleness signal. Only a loaded knowledge base becomes stale.
    pub fn mark_stale(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == KbState::Loaded {
            *state = KbState::Stale;
        }
    }

    /// Cancel the rebuild in progress, if any.
    pub fn cancel_rebuild(&self) {
        self.build_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Load the persisted index, or rebuild from the corpus.
    ///
    /// Without `force_rebuild` a valid persisted index is reused. Returns
    /// `false` when nothing could be loaded or built; the previous state is
    /// kept in that case.
    pub async fn load_knowledge_base(&self, force_rebuild: bool) -> bool {
        if !force_rebuild {
            let _guard = self.rebuild_lock.lock().await;
            let mut index = EmbeddingIndex::new(
                Arc::clone(&self.embedder),
                IndexOptions::from_config(&self.config),
            );
            if index.reload(&self.config.paths.index_storage) {
                tracing::info!("loaded existing knowledge base");
                self.install(index, KbState::Loaded);
                return true;
            }
        }

        tracing::info!("building knowledge base from documents");
        self.rebuild().await
    }

    /// Reprocess the whole corpus.
    pub async fn update_knowledge_base(&self) -> bool {
        tracing::info!("updating knowledge base");
        self.rebuild().await
    }

    async fn rebuild(&self) -> bool {
        let _guard = self.rebuild_lock.lock().await;
        let cancel = self.fresh_cancel_token();

        let build = self.build_index(&cancel);
        let result = match self.config.index.build_timeout_secs {
            0 => build.await,
            secs => match tokio::time::timeout(Duration::from_secs(secs), build).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    tracing::error!(timeout_secs = secs, "knowledge base rebuild timed out");
                    return false;
                }
            },
        };

        let index = match result {
            Ok(Some(index)) => index,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(error = %e, "failed to rebuild knowledge base");
                return false;
            }
        };

        let chunks = index.len();
        let persisted = self.persist_and_install(index, KbState::Loaded);
        if persisted {
            tracing::info!(chunks, "knowledge base built");
        }
        persisted
    }

    /// Scan, chunk and embed the corpus into a new index. `None` when the corpus is empty.
    async fn build_index(&self, cancel: &CancellationToken) -> anyhow::Result<Option<EmbeddingIndex>> {
        let report = scan_directory(
            &self.config.paths.knowledge_base,
            &self.config.loader.scan_options(),
        )?;
        if !report.skipped.is_empty() {
            tracing::info!(skipped = report.skipped.len(), "some files were skipped");
        }

        let chunks = self.chunker.chunk_all(&report.documents);
        if chunks.is_empty() {
            tracing::warn!(
                path = %self.config.paths.knowledge_base.display(),
                "no documents found in knowledge base directory"
            );
            return Ok(None);
        }

        let mut index = EmbeddingIndex::new(
            Arc::clone(&self.embedder),
            IndexOptions::from_config(&self.config),
        );
        index.create(chunks, cancel).await?;
        Ok(Some(index))
    }

    /// Load, chunk and append specific files to the current index.
    pub async fn add_documents(&self, paths: &[PathBuf]) -> bool {
        let _guard = self.rebuild_lock.lock().await;
        let cancel = self.fresh_cancel_token();

        let mut documents = Vec::new();
        for path in paths {
            match load_document(path) {
                Ok(doc) if doc.content.trim().is_empty() => {
                    tracing::warn!(file = %doc.filename, "empty document, skipping");
                }
                Ok(doc) => documents.push(doc),
                Err(e) => tracing::error!(error = %e, "failed to load document"),
            }
        }

        let chunks = self.chunker.chunk_all(&documents);
        if chunks.is_empty() {
            tracing::warn!("no documents to add");
            return false;
        }

        let mut index = EmbeddingIndex::clone(&self.snapshot());
        if let Err(e) = index.add(chunks, &cancel).await {
            tracing::error!(error = %e, "failed to add documents");
            return false;
        }

        let next_state = match self.state() {
            KbState::Empty => KbState::Loaded,
            other => other,
        };
        let persisted = self.persist_and_install(index, next_state);
        if persisted {
            tracing::info!(documents = documents.len(), "added documents to knowledge base");
        }
        persisted
    }

    /// Top-`k` chunks for `query`. Never fails; an empty knowledge base yields nothing.
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<SearchHit> {
        if self.state() == KbState::Empty {
            return Vec::new();
        }
        self.snapshot().search(query, k).await
    }

    /// Retrieve context and hand it to `generator`.
    pub async fn answer_question(
        &self,
        question: &str,
        k: usize,
        generator: &dyn AnswerGenerator,
    ) -> Answer {
        let hits = self.retrieve(question, k).await;
        let answer = match generator.generate(question, &hits).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to generate answer");
                format!("Error generating answer: {}", e)
            }
        };

        Answer {
            answer,
            sources: collect_sources(&hits),
            context_count: hits.len(),
            question: question.to_string(),
        }
    }

    pub fn stats(&self) -> KnowledgeBaseStats {
        KnowledgeBaseStats {
            state: self.state(),
            index: self.snapshot().stats(),
        }
    }

    /// Drop the served index and remove its persisted files.
    pub async fn delete_index(&self) {
        let _guard = self.rebuild_lock.lock().await;
        let mut index = EmbeddingIndex::clone(&self.snapshot());
        index.delete(&self.config.paths.index_storage);
        self.install(index, KbState::Empty);
    }

    /// Persist `index`, then serve it. A persist failure still swaps the
    /// in-memory index but reports `false`.
    fn persist_and_install(&self, index: EmbeddingIndex, state: KbState) -> bool {
        let persisted = match index.persist(&self.config.paths.index_storage) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "failed to persist knowledge base");
                false
            }
        };
        self.install(index, state);
        persisted
    }

    fn install(&self, index: EmbeddingIndex, state: KbState) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn fresh_cancel_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self
            .build_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }
}
