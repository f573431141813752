//! Tools façade: the five operations a transport exposes to clients. The
//! transport envelope itself lives elsewhere; this layer owns the shapes
//! and delegates to the dispatcher and the indexing engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Serialize;

use crate::application::dispatcher::{Dispatcher, RerankMode, SearchRequest};
use crate::application::indexer::{IndexOptions, IndexingEngine};
use crate::application::interfaces::IndexStore;
use crate::application::registry::{PluginRegistry, PluginStatus};
use crate::domain::{
    EngineError, IndexReport, LookupOutcome, Repository, SearchOutcome, SymbolKind,
};

/// Aggregate state of one indexed repository
#[derive(Debug, Serialize, JsonSchema)]
pub struct RepositoryStatusOutput {
    /// Stable repository identifier (remote-derived or root hash)
    pub id: String,

    /// Live (non-tombstoned) files in the store
    pub files: u64,

    /// Symbols across those files
    pub symbols: u64,

    /// Nanosecond timestamp of the last indexing batch
    pub last_indexed_ns: i64,
}

/// Vector backend health as seen at status time
#[derive(Debug, Serialize, JsonSchema)]
pub struct VectorStoreStatusOutput {
    /// Whether a vector store is wired at all
    pub enabled: bool,

    /// Whether it answered the liveness probe
    pub reachable: bool,

    /// Embedding model the collection is bound to
    pub model_id: Option<String>,
}

/// Response of `get_status`
#[derive(Debug, Serialize, JsonSchema)]
pub struct StatusOutput {
    pub repositories: Vec<RepositoryStatusOutput>,
    pub vector_store: VectorStoreStatusOutput,
    pub plugins: Vec<PluginStatus>,
}

pub struct Tools {
    repo: Repository,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<IndexingEngine>,
    registry: Arc<PluginRegistry>,
    store: Arc<dyn IndexStore>,
}

impl Tools {
    pub fn new(
        repo: Repository,
        dispatcher: Arc<Dispatcher>,
        engine: Arc<IndexingEngine>,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            engine,
            registry,
            store,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Find symbol definitions by name. `kind` narrows to one symbol kind;
    /// `"any"` or absence matches all.
    pub async fn symbol_lookup(
        &self,
        name: &str,
        kind: Option<&str>,
    ) -> Result<LookupOutcome, EngineError> {
        let kind = parse_kind(kind);
        self.dispatcher
            .lookup(self.repo.id(), name, kind, None)
            .await
    }

    /// Lexical (BM25) or hybrid semantic code search.
    pub async fn search_code(
        &self,
        query: &str,
        semantic: bool,
        limit: Option<usize>,
        rerank: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> Result<SearchOutcome, EngineError> {
        let mut request = SearchRequest::new(query)
            .semantic(semantic)
            .with_rerank(rerank.map(RerankMode::parse).unwrap_or_default());
        request.limit = limit;
        request.timeout = timeout_ms.map(Duration::from_millis);
        self.dispatcher.search(self.repo.id(), request).await
    }

    /// Repository, vector-store and plugin state in one response.
    pub async fn get_status(&self) -> Result<StatusOutput, EngineError> {
        let repositories = self
            .store
            .repository_stats()
            .await?
            .into_iter()
            .map(|stats| RepositoryStatusOutput {
                id: stats.id,
                files: stats.files,
                symbols: stats.symbols,
                last_indexed_ns: stats.last_indexed_ns,
            })
            .collect();

        let vector_store = match self.dispatcher.embedder() {
            Some(embedder) => {
                let reachable = embedder.vector_store().reachable().await;
                let model_id = if reachable {
                    embedder
                        .vector_store()
                        .collection_model(embedder.collection())
                        .await
                        .ok()
                        .flatten()
                        .map(|m| m.model_id)
                } else {
                    None
                };
                VectorStoreStatusOutput {
                    enabled: true,
                    reachable,
                    model_id,
                }
            }
            None => VectorStoreStatusOutput {
                enabled: false,
                reachable: false,
                model_id: None,
            },
        };

        Ok(StatusOutput {
            repositories,
            vector_store,
            plugins: self.registry.states().await,
        })
    }

    /// Registered plugins with their extensions and lifecycle state.
    pub async fn list_plugins(&self) -> Vec<PluginStatus> {
        self.registry.states().await
    }

    /// Re-index the repository, or one path inside it. `force` bypasses the
    /// stat and content-hash fast paths.
    pub async fn reindex(
        &self,
        path: Option<&str>,
        force: bool,
    ) -> Result<IndexReport, EngineError> {
        let options = IndexOptions {
            force,
            paths: path.map(|p| vec![PathBuf::from(p)]),
        };
        self.engine.index_repository(&self.repo, &options).await
    }
}

fn parse_kind(kind: Option<&str>) -> Option<SymbolKind> {
    match kind {
        None => None,
        Some(s) if s.eq_ignore_ascii_case("any") || s.is_empty() => None,
        Some(s) => Some(SymbolKind::parse(s)),
    }
}
