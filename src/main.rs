//! # Knowledge Harness CLI (`kb`)
//!
//! Management commands for the knowledge base: build or update the index
//! from the document directory, inspect it, and query it.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Rebuild the index from scratch and persist it |
//! | `kb update` | Reprocess every document in the knowledge base |
//! | `kb stats` | Load the index and print its statistics |
//! | `kb search "<query>"` | Print the top-k matching chunks |
//! | `kb ask "<question>"` | Answer a question from retrieved context |
//!
//! A missing config file is not an error: defaults apply, and the
//! `KNOWLEDGE_BASE_PATH`, `VECTOR_DB_PATH`, `CHUNK_SIZE` and
//! `CHUNK_OVERLAP` environment variables override either.

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use knowledge_harness::config::{self, Config};
use knowledge_harness::knowledge::{ContextOnlyGenerator, KnowledgeBase};
use knowledge_harness::logging;

/// Knowledge Harness CLI: retrieval over a local document knowledge base.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "Knowledge Harness: build and query a local document knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kb.toml`; built-in defaults apply when it is absent.
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from scratch.
    ///
    /// Creates the knowledge base and index directories if needed, then
    /// loads, chunks and embeds every supported file and persists the result.
    Init,

    /// Rebuild the index from the current contents of the knowledge base.
    Update,

    /// Show knowledge base statistics.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the chunks most similar to a query.
    Search {
        query: String,

        /// Number of results (defaults to `[retrieval].top_k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer a question using retrieved context.
    Ask {
        question: String,

        /// Number of context chunks (defaults to `[retrieval].top_k`).
        #[arg(short, long)]
        k: Option<usize>,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => run_init(cfg).await?,
        Commands::Update => run_update(cfg).await?,
        Commands::Stats { json } => run_stats(cfg, json).await?,
        Commands::Search { query, k } => run_search(cfg, &query, k).await?,
        Commands::Ask { question, k, json } => run_ask(cfg, &question, k, json).await?,
    }

    Ok(())
}

async fn run_init(cfg: Config) -> anyhow::Result<()> {
    cfg.ensure_directories()?;
    let kb = KnowledgeBase::new(cfg)?;

    if !kb.load_knowledge_base(true).await {
        bail!("Failed to initialize knowledge base");
    }
    println!(
        "Knowledge base initialized with {} chunks.",
        kb.stats().index.document_count
    );
    Ok(())
}

async fn run_update(cfg: Config) -> anyhow::Result<()> {
    let kb = KnowledgeBase::new(cfg)?;

    if !kb.update_knowledge_base().await {
        bail!("Failed to update knowledge base");
    }
    println!(
        "Knowledge base updated with {} chunks.",
        kb.stats().index.document_count
    );
    Ok(())
}

async fn run_stats(cfg: Config, json: bool) -> anyhow::Result<()> {
    let kb = KnowledgeBase::new(cfg)?;

    if !kb.load_knowledge_base(false).await {
        println!("Knowledge base not found or failed to load.");
        return Ok(());
    }

    let stats = kb.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let status = serde_json::to_value(stats.index.status)?;
    println!("Knowledge Base Statistics:");
    println!("  Status:          {}", status.as_str().unwrap_or_default());
    println!("  Document Count:  {}", stats.index.document_count);
    println!(
        "  Embedding Model: {}",
        stats.index.embedding_model.as_deref().unwrap_or("(none)")
    );
    Ok(())
}

async fn loaded_knowledge_base(cfg: Config) -> anyhow::Result<KnowledgeBase> {
    let kb = KnowledgeBase::new(cfg)?;
    if !kb.load_knowledge_base(false).await {
        bail!("Knowledge base not available. Run `kb init` first.");
    }
    Ok(kb)
}

async fn run_search(cfg: Config, query: &str, k: Option<usize>) -> anyhow::Result<()> {
    let k = k.unwrap_or(cfg.retrieval.top_k);
    let kb = loaded_knowledge_base(cfg).await?;

    let hits = kb.retrieve(query, k).await;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({}) chunk {}/{}",
            i + 1,
            hit.score,
            hit.chunk.filename,
            hit.chunk.source_type,
            hit.chunk.chunk_index + 1,
            hit.chunk.chunk_count
        );
        println!("    path: {}", hit.chunk.source_path);
        println!("    excerpt: \"{}\"", excerpt(&hit.chunk.text, 240));
        println!();
    }
    Ok(())
}

async fn run_ask(cfg: Config, question: &str, k: Option<usize>, json: bool) -> anyhow::Result<()> {
    let k = k.unwrap_or(cfg.retrieval.top_k);
    let kb = loaded_knowledge_base(cfg).await?;

    let answer = kb.answer_question(question, k, &ContextOnlyGenerator).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    let rule = "=".repeat(50);
    println!("{}", rule);
    println!("QUESTION: {}", answer.question);
    println!("{}", rule);
    println!("ANSWER:");
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("SOURCES:");
        for source in &answer.sources {
            println!("  - {} ({})", source.filename, source.source_type);
        }
    }
    println!("{}", rule);
    Ok(())
}

/// Single-line excerpt of at most `max_chars` characters.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
