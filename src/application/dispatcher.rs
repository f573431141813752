//! Query dispatcher: routes each query across the symbol table, BM25 and
//! the vector store, merges with weighted RRF, and enforces deadlines with
//! graceful fallback. Timeouts are outcomes here (`partial=true`), never
//! errors; a missing vector backend degrades to BM25 (`degraded=true`).

use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::config::EngineConfig;
use crate::application::embedder::EmbeddingPipeline;
use crate::application::fusion::rrf_fuse;
use crate::application::interfaces::{FtsMode, IndexStore, Reranker, ScoredPoint};
use crate::application::query::parse_query;
use crate::application::rerank::{HybridReranker, TfIdfReranker};
use crate::application::snippet;
use crate::domain::{EngineError, Hit, HitSource, LookupOutcome, SearchOutcome, SymbolKind};

/// Rerank strategy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerankMode {
    #[default]
    Off,
    TfIdf,
    External,
    Hybrid,
}

impl RerankMode {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tfidf" => RerankMode::TfIdf,
            "external" => RerankMode::External,
            "hybrid" => RerankMode::Hybrid,
            _ => RerankMode::Off,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub semantic: bool,
    pub limit: Option<usize>,
    pub timeout: Option<Duration>,
    pub rerank: RerankMode,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn semantic(mut self, semantic: bool) -> Self {
        self.semantic = semantic;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_rerank(mut self, rerank: RerankMode) -> Self {
        self.rerank = rerank;
        self
    }
}

pub struct Dispatcher {
    store: Arc<dyn IndexStore>,
    embedder: Option<Arc<EmbeddingPipeline>>,
    tfidf: Arc<dyn Reranker>,
    external: Option<Arc<dyn Reranker>>,
    config: EngineConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn IndexStore>, config: EngineConfig) -> Self {
        Self {
            store,
            embedder: None,
            tfidf: Arc::new(TfIdfReranker::new()),
            external: None,
            config,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<EmbeddingPipeline>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_external_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.external = Some(reranker);
        self
    }

    pub fn vector_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn embedder(&self) -> Option<&Arc<EmbeddingPipeline>> {
        self.embedder.as_ref()
    }

    /// Symbol lookup: exact-case, then case-insensitive, then prefix (all
    /// inside the store), then BM25 over the symbol documents. Precision
    /// over recall; fuzzy only when exact fails.
    pub async fn lookup(
        &self,
        repository_id: &str,
        name: &str,
        kind: Option<SymbolKind>,
        limit: Option<usize>,
    ) -> Result<LookupOutcome, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::invalid_query("empty symbol name"));
        }
        if !self.store.has_repository(repository_id).await? {
            return Err(EngineError::RepositoryNotIndexed(repository_id.to_string()));
        }
        let limit = self.config.clamp_limit(limit);

        let lookup = async {
            let hits = self
                .store
                .lookup_symbol(repository_id, name, kind, limit)
                .await?;
            if !hits.is_empty() {
                return Ok::<Vec<Hit>, EngineError>(hits);
            }
            debug!("Symbol tiers empty for {:?}; trying fts_symbol", name);
            self.store
                .search_fts(repository_id, name, FtsMode::Symbol, limit)
                .await
        };

        match tokio::time::timeout(self.config.query_timeout, lookup).await {
            Ok(hits) => Ok(LookupOutcome {
                hits: hits?,
                partial: false,
            }),
            Err(_) => Ok(LookupOutcome {
                hits: Vec::new(),
                partial: true,
            }),
        }
    }

    /// Code search. `semantic=false` is the BM25 fast path: it reaches the
    /// store directly and never instantiates a plugin. `semantic=true` runs
    /// BM25 and vector legs in parallel and fuses them.
    pub async fn search(
        &self,
        repository_id: &str,
        request: SearchRequest,
    ) -> Result<SearchOutcome, EngineError> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(EngineError::invalid_query("empty query"));
        }
        if !self.store.has_repository(repository_id).await? {
            return Err(EngineError::RepositoryNotIndexed(repository_id.to_string()));
        }

        let limit = self.config.clamp_limit(request.limit);
        let deadline = request.timeout.unwrap_or(self.config.query_timeout);

        if !request.semantic {
            return self.search_bm25(repository_id, &query, limit, deadline, request.rerank).await;
        }
        self.search_hybrid(repository_id, &query, limit, deadline, request.rerank)
            .await
    }

    async fn search_bm25(
        &self,
        repository_id: &str,
        query: &str,
        limit: usize,
        deadline: Duration,
        rerank: RerankMode,
    ) -> Result<SearchOutcome, EngineError> {
        let fetch = fetch_limit(limit, rerank);
        let search = self
            .store
            .search_fts(repository_id, query, FtsMode::Code, fetch);

        let mut outcome = match tokio::time::timeout(deadline, search).await {
            Ok(hits) => SearchOutcome::of(hits?),
            Err(_) => {
                warn!("BM25 search timed out after {:?}", deadline);
                SearchOutcome {
                    partial: true,
                    ..SearchOutcome::default()
                }
            }
        };

        outcome.hits = self.apply_rerank(query, outcome.hits, limit, rerank, &mut outcome.errors).await;
        outcome.hits.truncate(limit);
        Ok(outcome)
    }

    async fn search_hybrid(
        &self,
        repository_id: &str,
        query: &str,
        limit: usize,
        deadline: Duration,
        rerank: RerankMode,
    ) -> Result<SearchOutcome, EngineError> {
        let fetch = fetch_limit(limit, rerank);
        let mut outcome = SearchOutcome::default();

        // Decide up front whether the vector leg can run at all.
        let vector_ready = match self.probe_vector().await {
            Ok(ready) => ready,
            Err(e) if e.is_model_mismatch() => return Err(e),
            Err(e) => {
                outcome.degraded = true;
                outcome.errors.push(e.to_string());
                false
            }
        };
        if !vector_ready && !outcome.degraded {
            outcome.degraded = true;
            outcome.errors.push("vector store unavailable".to_string());
        }

        let cancel = CancellationToken::new();

        let bm25_store = self.store.clone();
        let bm25_cancel = cancel.clone();
        let bm25_repo = repository_id.to_string();
        let bm25_query = query.to_string();
        let mut bm25_task = tokio::spawn(async move {
            tokio::select! {
                _ = bm25_cancel.cancelled() => None,
                result = bm25_store.search_fts(&bm25_repo, &bm25_query, FtsMode::Code, fetch) => {
                    Some(result)
                }
            }
        });

        let vector_cancel = cancel.clone();
        let vector_pipeline = vector_ready.then(|| self.embedder.clone()).flatten();
        let vector_query = query.to_string();
        let load_timeout = self.config.plugin_load_timeout;
        let mut vector_task = tokio::spawn(async move {
            let pipeline = vector_pipeline?;
            tokio::select! {
                _ = vector_cancel.cancelled() => None,
                result = tokio::time::timeout(load_timeout, pipeline.search(&vector_query, fetch)) => {
                    match result {
                        Ok(points) => Some(points),
                        Err(_) => Some(Err(EngineError::timeout("vector leg overran its bound"))),
                    }
                }
            }
        });

        // The canceller fires the token at the deadline; legs select on it
        // and resolve with whatever they have. The single join below is
        // bounded by deadline + grace as a backstop against legs that
        // ignore cancellation, so the query is terminal inside that window.
        let deadline_cancel = cancel.clone();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            debug!("Query deadline hit; cancelling outstanding sub-queries");
            deadline_cancel.cancel();
        });

        let joined = future::join(&mut bm25_task, &mut vector_task);
        let (bm25_leg, vector_leg) =
            match tokio::time::timeout(deadline + self.config.cancellation_grace, joined).await {
                Ok((b, v)) => (flatten_leg(b), flatten_leg(v)),
                Err(_) => {
                    bm25_task.abort();
                    vector_task.abort();
                    (None, None)
                }
            };
        canceller.abort();

        let bm25_hits = match bm25_leg {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => return Err(e),
            None => {
                outcome.partial = true;
                Vec::new()
            }
        };

        let vector_hits = match vector_leg {
            Some(Ok(points)) => self.points_to_hits(repository_id, query, points).await,
            Some(Err(e)) => {
                warn!("Vector leg degraded: {}", e);
                outcome.degraded = true;
                outcome.errors.push(e.to_string());
                Vec::new()
            }
            None => {
                if vector_ready {
                    outcome.partial = true;
                }
                Vec::new()
            }
        };

        info!(
            "Hybrid search: {} bm25 + {} vector candidates (partial={}, degraded={})",
            bm25_hits.len(),
            vector_hits.len(),
            outcome.partial,
            outcome.degraded
        );

        let fused = rrf_fuse(
            vec![
                (bm25_hits, self.config.bm25_weight),
                (vector_hits, self.config.vector_weight),
            ],
            self.config.rrf_k,
            fetch,
        );

        outcome.hits = self
            .apply_rerank(query, fused, limit, rerank, &mut outcome.errors)
            .await;
        outcome.hits.truncate(limit);
        Ok(outcome)
    }

    /// Check the vector backend: present, reachable, and model-compatible.
    /// `Ok(false)` means "not configured", an error means "configured but
    /// unusable" (degradable unless it is a model mismatch).
    async fn probe_vector(&self) -> Result<bool, EngineError> {
        let Some(embedder) = &self.embedder else {
            return Ok(false);
        };
        if !embedder.vector_store().reachable().await {
            return Err(EngineError::vector("vector store unreachable"));
        }
        let expected = embedder.model();
        match embedder
            .vector_store()
            .collection_model(embedder.collection())
            .await?
        {
            Some(found) if found != expected => Err(EngineError::ModelMismatch {
                expected: format!("{} (dim {})", expected.model_id, expected.dim),
                found: format!("{} (dim {})", found.model_id, found.dim),
            }),
            _ => Ok(true),
        }
    }

    /// Convert scored vector points into hits, deduplicating to one hit per
    /// file and building snippets from the stored document text.
    async fn points_to_hits(
        &self,
        repository_id: &str,
        query: &str,
        points: Vec<ScoredPoint>,
    ) -> Vec<Hit> {
        let tokens = parse_query(query).positive_tokens();
        let mut hits: Vec<Hit> = Vec::new();
        for point in points {
            if hits
                .iter()
                .any(|h| h.relative_path == point.payload.relative_path)
            {
                continue;
            }
            let snippet_text = match self
                .store
                .file_text(repository_id, &point.payload.relative_path)
                .await
            {
                Ok(Some(body)) => chunk_snippet(&body, point.payload.start_line, point.payload.end_line),
                _ => String::new(),
            };
            let highlights = snippet::highlight_offsets(&snippet_text, &tokens);
            hits.push(
                Hit::new(
                    point.payload.relative_path.clone(),
                    point.payload.start_line,
                    point.payload.end_line,
                    snippet_text,
                    point.score,
                    HitSource::Vector,
                )
                .with_highlights(highlights),
            );
        }
        hits
    }

    async fn apply_rerank(
        &self,
        query: &str,
        hits: Vec<Hit>,
        limit: usize,
        mode: RerankMode,
        errors: &mut Vec<String>,
    ) -> Vec<Hit> {
        if hits.is_empty() || mode == RerankMode::Off {
            return hits;
        }

        let reranker: Arc<dyn Reranker> = match mode {
            RerankMode::Off => return hits,
            RerankMode::TfIdf => self.tfidf.clone(),
            RerankMode::External => match &self.external {
                Some(external) => external.clone(),
                None => {
                    errors.push("external reranker not configured".to_string());
                    return hits;
                }
            },
            RerankMode::Hybrid => {
                let primary = self.external.clone().unwrap_or_else(|| self.tfidf.clone());
                Arc::new(HybridReranker::new(
                    primary,
                    self.tfidf.clone(),
                    self.config.rerank_budget,
                ))
            }
        };

        match reranker.rerank(query, hits.clone(), limit).await {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!("Reranker {} failed: {}", reranker.name(), e);
                errors.push(format!("rerank failed: {}", e));
                hits
            }
        }
    }
}

/// Fetch extra candidates when a reranker will trim afterwards, so the
/// post-filter has a meaningful pool.
fn fetch_limit(limit: usize, rerank: RerankMode) -> usize {
    if rerank == RerankMode::Off {
        limit
    } else {
        (limit * 2).max(20)
    }
}

fn flatten_leg<T>(
    joined: Result<Option<Result<T, EngineError>>, tokio::task::JoinError>,
) -> Option<Result<T, EngineError>> {
    match joined {
        Ok(inner) => inner,
        Err(e) => Some(Err(EngineError::internal(format!("sub-query panicked: {}", e)))),
    }
}

/// The lines a chunk covered, clipped to the snippet bound.
fn chunk_snippet(body: &str, start_line: u32, end_line: u32) -> String {
    let start = start_line.saturating_sub(1) as usize;
    let take = (end_line.saturating_sub(start_line) as usize) + 1;
    let text: String = body
        .lines()
        .skip(start)
        .take(take)
        .collect::<Vec<_>>()
        .join("\n");
    let mut clipped = String::with_capacity(snippet::MAX_SNIPPET_BYTES);
    for c in text.chars() {
        if clipped.len() + c.len_utf8() > snippet::MAX_SNIPPET_BYTES {
            break;
        }
        clipped.push(c);
    }
    clipped
}

