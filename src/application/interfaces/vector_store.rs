use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::EngineError;

/// Payload stored alongside every vector. `chunk_hash` is the hash of the
/// exact text that produced the vector; `model_id`/`model_dim` gate
/// compatibility at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub relative_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_hash: String,
    pub model_id: String,
    pub model_dim: usize,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    /// Similarity in [0, 1], higher is better.
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Payload predicate for deletes, fetches and searches.
#[derive(Debug, Clone, Default)]
pub struct PointFilter {
    pub relative_path: Option<String>,
}

impl PointFilter {
    pub fn by_path(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: Some(relative_path.into()),
        }
    }

    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        match &self.relative_path {
            Some(path) => payload.relative_path == *path,
            None => true,
        }
    }
}

/// The `(model_id, dim)` pair fixed once per collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionModel {
    pub model_id: String,
    pub dim: usize,
}

/// The vector store collaborator. Point ids are content-addressed, so
/// last-writer-wins on id collisions is safe.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent; an existing collection with a different model pair is a
    /// `ModelMismatch`.
    async fn ensure_collection(
        &self,
        collection: &str,
        model: &CollectionModel,
    ) -> Result<(), EngineError>;

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), EngineError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&PointFilter>,
    ) -> Result<Vec<ScoredPoint>, EngineError>;

    /// Remove points matching the filter; returns how many were removed.
    async fn delete(&self, collection: &str, filter: &PointFilter) -> Result<u64, EngineError>;

    /// Points matching the filter, payloads included. Used for chunk-hash
    /// diffing before re-embedding.
    async fn fetch(
        &self,
        collection: &str,
        filter: &PointFilter,
    ) -> Result<Vec<VectorPoint>, EngineError>;

    /// Rewrite payload paths for a moved file without touching vectors.
    async fn update_path(
        &self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<u64, EngineError>;

    async fn collection_model(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionModel>, EngineError>;

    /// Cheap liveness probe; queries degrade to BM25-only when false.
    async fn reachable(&self) -> bool;
}
