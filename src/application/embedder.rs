//! Embedding pipeline: keeps the vector store consistent with indexed
//! files. Chunks whose hashes are already stored are never re-embedded;
//! provider failures retry with backoff and then park on a pending queue
//! that a background sweep drains.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::config::EngineConfig;
use crate::application::interfaces::{
    ChunkPayload, CollectionModel, EmbedKind, EmbeddingProvider, PointFilter, ScoredPoint,
    VectorPoint, VectorStore,
};
use crate::domain::{Chunk, EngineError};

struct PendingChunk {
    repository_id: String,
    chunk: Chunk,
    chunk_index: usize,
}

pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    vector: Arc<dyn VectorStore>,
    collection: String,
    batch_size: usize,
    backoff_base: Duration,
    attempts: u32,
    pending: Mutex<VecDeque<PendingChunk>>,
}

impl EmbeddingPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        vector: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            provider,
            vector,
            collection: collection.into(),
            batch_size: config.embed_batch_size.max(1),
            backoff_base: config.embed_backoff_base,
            attempts: config.embed_attempts.max(1),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn model(&self) -> CollectionModel {
        CollectionModel {
            model_id: self.provider.model_id().to_string(),
            dim: self.provider.dim(),
        }
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector
    }

    /// Create (or validate) the collection for the configured model.
    pub async fn ensure_ready(&self) -> Result<(), EngineError> {
        self.vector
            .ensure_collection(&self.collection, &self.model())
            .await
    }

    /// Bring the vector store in line with a freshly indexed file. Unchanged
    /// chunks keep their stored vectors; only new or altered text reaches
    /// the provider.
    pub async fn sync_file(
        &self,
        repository_id: &str,
        relative_path: &str,
        chunks: &[Chunk],
    ) -> Result<(), EngineError> {
        if chunks.is_empty() {
            self.delete_file(relative_path).await?;
            return Ok(());
        }

        let existing = self
            .vector
            .fetch(&self.collection, &PointFilter::by_path(relative_path))
            .await?;
        let existing_by_id: HashMap<String, VectorPoint> = existing
            .into_iter()
            .map(|point| (point.id.clone(), point))
            .collect();

        let model = self.model();
        let mut points: Vec<VectorPoint> = Vec::with_capacity(chunks.len());
        let mut to_embed: Vec<(usize, &Chunk)> = Vec::new();

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            let id = Chunk::point_id(repository_id, relative_path, chunk_index);
            match existing_by_id.get(&id) {
                Some(stored) if stored.payload.chunk_hash == chunk.chunk_hash() => {
                    let mut reused = stored.clone();
                    reused.payload = self.payload_for(chunk, &model);
                    points.push(reused);
                }
                _ => to_embed.push((chunk_index, chunk)),
            }
        }

        let reused = points.len();
        let mut parked = 0usize;
        for batch in to_embed.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, c)| c.text().to_string()).collect();
            match self.embed_with_retry(&texts, EmbedKind::Code).await {
                Ok(vectors) => {
                    for ((chunk_index, chunk), vector) in batch.iter().zip(vectors) {
                        points.push(VectorPoint {
                            id: Chunk::point_id(repository_id, relative_path, *chunk_index),
                            vector,
                            payload: self.payload_for(chunk, &model),
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        "Embedding provider failed for {} ({}); parking {} chunks",
                        relative_path,
                        e,
                        batch.len()
                    );
                    let mut pending = self.pending.lock().await;
                    for (chunk_index, chunk) in batch {
                        pending.push_back(PendingChunk {
                            repository_id: repository_id.to_string(),
                            chunk: (*chunk).clone(),
                            chunk_index: *chunk_index,
                        });
                    }
                    parked += batch.len();
                }
            }
        }

        // Replace the file's points wholesale so shrunken chunk sets leave
        // no stale trailing ids behind.
        self.vector
            .delete(&self.collection, &PointFilter::by_path(relative_path))
            .await?;
        if !points.is_empty() {
            self.vector.upsert(&self.collection, points).await?;
        }

        debug!(
            "Vector sync {}: {} reused, {} embedded, {} pending",
            relative_path,
            reused,
            chunks.len() - reused - parked,
            parked
        );
        Ok(())
    }

    pub async fn delete_file(&self, relative_path: &str) -> Result<u64, EngineError> {
        self.vector
            .delete(&self.collection, &PointFilter::by_path(relative_path))
            .await
    }

    /// Move a file's points to a new path without re-embedding.
    pub async fn rename_file(&self, from: &str, to: &str) -> Result<u64, EngineError> {
        self.vector.update_path(&self.collection, from, to).await
    }

    /// Embed the query text and run a similarity search.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPoint>, EngineError> {
        let vectors = self
            .provider
            .embed(&[query.to_string()], EmbedKind::Query)
            .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::embedding("provider returned no query vector"))?;
        self.vector.search(&self.collection, &vector, k, None).await
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Retry parked chunks; returns how many were upserted. Failures go
    /// back on the queue for the next sweep.
    pub async fn sweep_pending(&self) -> usize {
        let drained: Vec<PendingChunk> = {
            let mut pending = self.pending.lock().await;
            pending.drain(..).collect()
        };
        if drained.is_empty() {
            return 0;
        }
        info!("Retrying {} pending embeddings", drained.len());

        let model = self.model();
        let mut upserted = 0usize;
        let mut still_pending: VecDeque<PendingChunk> = VecDeque::new();

        for batch in drained.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.chunk.text().to_string()).collect();
            match self.embed_with_retry(&texts, EmbedKind::Code).await {
                Ok(vectors) => {
                    let points: Vec<VectorPoint> = batch
                        .iter()
                        .zip(vectors)
                        .map(|(pending, vector)| VectorPoint {
                            id: Chunk::point_id(
                                &pending.repository_id,
                                pending.chunk.relative_path(),
                                pending.chunk_index,
                            ),
                            vector,
                            payload: self.payload_for(&pending.chunk, &model),
                        })
                        .collect();
                    match self.vector.upsert(&self.collection, points).await {
                        Ok(()) => upserted += batch.len(),
                        Err(e) => {
                            warn!("Pending upsert failed: {}", e);
                            still_pending.extend(batch.iter().map(|p| PendingChunk {
                                repository_id: p.repository_id.clone(),
                                chunk: p.chunk.clone(),
                                chunk_index: p.chunk_index,
                            }));
                        }
                    }
                }
                Err(e) => {
                    warn!("Pending embed failed: {}", e);
                    still_pending.extend(batch.iter().map(|p| PendingChunk {
                        repository_id: p.repository_id.clone(),
                        chunk: p.chunk.clone(),
                        chunk_index: p.chunk_index,
                    }));
                }
            }
        }

        if !still_pending.is_empty() {
            self.pending.lock().await.extend(still_pending);
        }
        upserted
    }

    /// Background task retrying pending chunks until cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if pipeline.pending_len().await > 0 {
                            pipeline.sweep_pending().await;
                        }
                    }
                }
            }
        })
    }

    fn payload_for(&self, chunk: &Chunk, model: &CollectionModel) -> ChunkPayload {
        ChunkPayload {
            relative_path: chunk.relative_path().to_string(),
            start_line: chunk.start_line(),
            end_line: chunk.end_line(),
            chunk_hash: chunk.chunk_hash().to_string(),
            model_id: model.model_id.clone(),
            model_dim: model.dim,
        }
    }

    async fn embed_with_retry(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, EngineError> {
        let mut delay = self.backoff_base;
        let mut last_error = None;
        for attempt in 1..=self.attempts {
            match self.provider.embed(texts, kind).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    if attempt < self.attempts {
                        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
                        let wait = delay + Duration::from_millis(jitter_ms);
                        warn!(
                            "Embed attempt {}/{} failed ({}); retrying in {:?}",
                            attempt, self.attempts, e, wait
                        );
                        tokio::time::sleep(wait).await;
                        delay *= 2;
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::embedding("exhausted retries")))
    }
}
