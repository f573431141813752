//! CodeIntel CLI - local-first code intelligence engine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use codeintel::{
    default_plugin_specs, Dispatcher, EmbeddingPipeline, EngineConfig, ExternalReranker,
    FallbackPlugin, FsWatcher, HttpEmbedding, HttpVectorStore, IndexLayout, IndexingEngine,
    MemoryVectorStore, MockEmbedding, PluginRegistry, Repository, SqliteStorage, Tools,
    SCHEMA_VERSION,
};
use codeintel::application::interfaces::{
    EmbeddingProvider, IndexStore, Plugin, VectorStore,
};

/// CodeIntel - symbol lookup, BM25 and semantic code search
#[derive(Parser)]
#[command(name = "codeintel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the data directory
    #[arg(short, long, global = true, default_value = "~/.codeintel")]
    data_dir: String,

    /// Vector store base URL (in-memory store when omitted)
    #[arg(long, global = true)]
    vector_url: Option<String>,

    /// Embedding provider endpoint (deterministic mock when omitted)
    #[arg(long, global = true)]
    embedding_url: Option<String>,

    /// Embedding model id reported to the vector store
    #[arg(long, global = true, default_value = "mock-embedding")]
    embedding_model: String,

    /// Embedding dimension
    #[arg(long, global = true, default_value = "384")]
    embedding_dim: usize,

    /// External reranker endpoint
    #[arg(long, global = true)]
    rerank_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a code repository
    Index {
        /// Path to the repository to index
        path: String,

        /// Re-index everything, bypassing change detection
        #[arg(short, long)]
        force: bool,
    },

    /// Search for code
    Search {
        /// Repository path the query runs against
        path: String,

        /// The search query
        query: String,

        /// Include the vector backend and fuse results
        #[arg(short, long)]
        semantic: bool,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Rerank strategy: off, tfidf, external, hybrid
        #[arg(short, long, default_value = "off")]
        rerank: String,
    },

    /// Look up a symbol definition by name
    Lookup {
        /// Repository path the lookup runs against
        path: String,

        /// Symbol name
        name: String,

        /// Restrict to one symbol kind (function, class, struct, ...)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Show repository, vector store and plugin status
    Status {
        /// Repository path
        path: String,
    },

    /// List registered plugins
    Plugins {
        /// Repository path
        path: String,
    },

    /// Watch a repository and keep its index in sync
    Watch {
        /// Repository path to watch
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let data_dir = expand_tilde(&cli.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    match &cli.command {
        Commands::Index { path, force } => {
            let wired = wire(&cli, path, &data_dir).await?;
            let spinner = progress_spinner("indexing");
            let report = wired.tools.reindex(None, *force).await?;
            spinner.finish_and_clear();

            println!(
                "Indexed {}: {} indexed, {} unchanged, {} skipped, {} errored",
                wired.tools.repository().id(),
                report.indexed,
                report.unchanged,
                report.skipped,
                report.errored
            );
            for failure in &report.errors {
                println!("  error: {} ({})", failure.path, failure.reason);
            }
        }

        Commands::Search {
            path,
            query,
            semantic,
            limit,
            rerank,
        } => {
            let wired = wire(&cli, path, &data_dir).await?;
            let outcome = wired
                .tools
                .search_code(query, *semantic, Some(*limit), Some(rerank.as_str()), None)
                .await?;

            if outcome.hits.is_empty() {
                println!("No results found.");
            } else {
                println!("Found {} results:\n", outcome.hits.len());
                for (index, hit) in outcome.hits.iter().enumerate() {
                    println!(
                        "{}. {} (score: {:.3}, source: {})",
                        index + 1,
                        hit.location(),
                        hit.score,
                        hit.source.as_str()
                    );
                    for line in hit.snippet.lines().take(3) {
                        println!("   | {}", line);
                    }
                    println!();
                }
            }
            if outcome.partial {
                println!("(partial: the query deadline cut some backends short)");
            }
            if outcome.degraded {
                println!("(degraded: vector backend unavailable, BM25 only)");
            }
        }

        Commands::Lookup { path, name, kind } => {
            let wired = wire(&cli, path, &data_dir).await?;
            let outcome = wired.tools.symbol_lookup(name, kind.as_deref()).await?;

            if outcome.hits.is_empty() {
                println!("No definition found for {}", name);
            } else {
                for hit in &outcome.hits {
                    let kind = hit
                        .kind
                        .map(|k| k.as_str().to_string())
                        .unwrap_or_else(|| "?".to_string());
                    println!("{}  {}  {}", hit.location(), kind, hit.snippet);
                }
            }
        }

        Commands::Status { path } => {
            let wired = wire(&cli, path, &data_dir).await?;
            let status = wired.tools.get_status().await?;

            println!("Repositories:");
            for repo in &status.repositories {
                println!(
                    "  {}  files={} symbols={} last_indexed_ns={}",
                    repo.id, repo.files, repo.symbols, repo.last_indexed_ns
                );
            }
            println!(
                "Vector store: enabled={} reachable={} model={}",
                status.vector_store.enabled,
                status.vector_store.reachable,
                status.vector_store.model_id.as_deref().unwrap_or("-")
            );
            println!("Plugins:");
            for plugin in &status.plugins {
                println!("  {}  {:?}", plugin.language, plugin.state);
            }
        }

        Commands::Plugins { path } => {
            let wired = wire(&cli, path, &data_dir).await?;
            for plugin in wired.tools.list_plugins().await {
                println!(
                    "{}  extensions={}  {:?}",
                    plugin.language,
                    plugin.extensions.join(","),
                    plugin.state
                );
            }
        }

        Commands::Watch { path } => {
            let wired = wire(&cli, path, &data_dir).await?;
            info!("Initial index before watching...");
            wired.tools.reindex(None, false).await?;

            let watcher = FsWatcher::new(
                wired.tools.repository().clone(),
                wired.engine.clone(),
                &wired.config,
            );
            let cancel = CancellationToken::new();
            let stop = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop.cancel();
                }
            });
            watcher.run(cancel).await?;
        }
    }

    Ok(())
}

struct Wired {
    tools: Tools,
    engine: Arc<IndexingEngine>,
    config: EngineConfig,
}

/// Construct the whole object graph for one repository. This is the only
/// place dependencies are wired together.
async fn wire(cli: &Cli, repo_path: &str, data_dir: &str) -> Result<Wired> {
    let config = EngineConfig::default();
    let repo = Repository::open(repo_path)?;

    let provider: Arc<dyn EmbeddingProvider> = match &cli.embedding_url {
        Some(url) => Arc::new(HttpEmbedding::new(
            url.clone(),
            cli.embedding_model.clone(),
            cli.embedding_dim,
            Duration::from_secs(30),
        )?),
        None => Arc::new(MockEmbedding::with_dimensions(cli.embedding_dim)),
    };

    let vector: Arc<dyn VectorStore> = match &cli.vector_url {
        Some(url) => Arc::new(HttpVectorStore::new(url.clone(), Duration::from_secs(30))?),
        None => Arc::new(MemoryVectorStore::new()),
    };

    let layout = IndexLayout::prepare(
        PathBuf::from(data_dir).join(repo.id().replace('/', "_")),
        repo.id(),
        repo.root(),
        SCHEMA_VERSION,
        plugin_versions(),
        Some(codeintel::CollectionModel {
            model_id: provider.model_id().to_string(),
            dim: provider.dim(),
        }),
    )?;

    let store: Arc<dyn IndexStore> = Arc::new(SqliteStorage::open(&layout.db_path())?);
    let registry = Arc::new(PluginRegistry::new(
        default_plugin_specs(),
        config.plugin_memory_budget,
        config.plugin_load_timeout,
        config.plugin_cooldown,
    ));
    let fallback: Arc<dyn Plugin> = Arc::new(FallbackPlugin::new());

    let pipeline = Arc::new(EmbeddingPipeline::new(
        provider,
        vector,
        "code_chunks",
        &config,
    ));
    if let Err(e) = pipeline.ensure_ready().await {
        warn!("Vector collection not ready ({}); semantic search will degrade", e);
    }

    let engine = Arc::new(IndexingEngine::new(
        store.clone(),
        registry.clone(),
        fallback,
        Some(pipeline.clone()),
        config.clone(),
    ));

    let mut dispatcher = Dispatcher::new(store.clone(), config.clone()).with_embedder(pipeline);
    if let Some(url) = &cli.rerank_url {
        dispatcher = dispatcher.with_external_reranker(Arc::new(ExternalReranker::new(
            url.clone(),
            Duration::from_secs(5),
        )?));
    }

    let tools = Tools::new(
        repo,
        Arc::new(dispatcher),
        engine.clone(),
        registry,
        store,
    );

    Ok(Wired {
        tools,
        engine,
        config,
    })
}

fn plugin_versions() -> BTreeMap<String, String> {
    default_plugin_specs()
        .iter()
        .map(|spec| {
            (
                spec.language().as_str().to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            )
        })
        .collect()
}

fn progress_spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.green} {msg:.dim}")
            .expect("Invalid progress template"),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Expand ~ to home directory.
fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
