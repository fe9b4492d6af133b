//! # Knowledge Harness
//!
//! Retrieval core for question answering over a small local document
//! corpus. Documents (PDF, plain text, markdown) are split into
//! overlapping chunks, embedded, and stored in a persisted vector index.
//! Questions are answered by retrieving the most similar chunks and
//! handing them, with citations, to an answer generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌────────────────┐   ┌────────────┐
//! │   Loader    │──▶│ Chunker  │──▶│ EmbeddingIndex │──▶│ vector_db/ │
//! │ PDF/TXT/MD  │   │ overlap  │   │ embed + search │   │ persisted  │
//! └─────────────┘   └──────────┘   └───────┬────────┘   └────────────┘
//!                                          │
//!                                  ┌───────┴────────┐
//!                                  │ KnowledgeBase  │◀── retrieve / answer
//!                                  │ snapshot swap  │
//!                                  └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb init                       # build the index from ./knowledge_base
//! kb stats                      # show index status
//! kb search "leadership" -k 3   # ranked chunks
//! kb ask "What motivates teams?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`chunk`] | Overlapping text chunking |
//! | [`extract`] | PDF and text extraction |
//! | [`loader`] | File and directory loading |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index with persistence |
//! | [`knowledge`] | Retrieval orchestrator |
//! | [`logging`] | `tracing` subscriber setup |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod knowledge;
pub mod loader;
pub mod logging;
pub mod models;
