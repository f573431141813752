use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::interfaces::{
    CollectionModel, PointFilter, ScoredPoint, VectorPoint, VectorStore,
};
use crate::domain::EngineError;

struct Collection {
    model: CollectionModel,
    points: HashMap<String, VectorPoint>,
}

/// In-memory vector store: brute-force cosine over a hash map. Used by
/// tests and by fully-offline runs where no vector server exists.
pub struct MemoryVectorStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(
        &self,
        collection: &str,
        model: &CollectionModel,
    ) -> Result<(), EngineError> {
        let mut collections = self.collections.lock().await;
        match collections.get(collection) {
            Some(existing) if existing.model != *model => Err(EngineError::ModelMismatch {
                expected: format!("{} (dim {})", model.model_id, model.dim),
                found: format!("{} (dim {})", existing.model.model_id, existing.model.dim),
            }),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    collection.to_string(),
                    Collection {
                        model: model.clone(),
                        points: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), EngineError> {
        let mut collections = self.collections.lock().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::vector(format!("no collection {}", collection)))?;

        for point in points {
            if point.payload.model_id != target.model.model_id
                || point.payload.model_dim != target.model.dim
            {
                return Err(EngineError::ModelMismatch {
                    expected: format!("{} (dim {})", target.model.model_id, target.model.dim),
                    found: format!("{} (dim {})", point.payload.model_id, point.payload.model_dim),
                });
            }
            target.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&PointFilter>,
    ) -> Result<Vec<ScoredPoint>, EngineError> {
        let collections = self.collections.lock().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| EngineError::vector(format!("no collection {}", collection)))?;

        let mut scored: Vec<ScoredPoint> = target
            .points
            .values()
            .filter(|point| filter.map(|f| f.matches(&point.payload)).unwrap_or(true))
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                // Cosine mapped from [-1, 1] into [0, 1].
                score: (cosine_similarity(vector, &point.vector) + 1.0) / 2.0,
                payload: point.payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete(&self, collection: &str, filter: &PointFilter) -> Result<u64, EngineError> {
        let mut collections = self.collections.lock().await;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = target.points.len();
        target.points.retain(|_, point| !filter.matches(&point.payload));
        let removed = (before - target.points.len()) as u64;
        debug!("Deleted {} points from {}", removed, collection);
        Ok(removed)
    }

    async fn fetch(
        &self,
        collection: &str,
        filter: &PointFilter,
    ) -> Result<Vec<VectorPoint>, EngineError> {
        let collections = self.collections.lock().await;
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(target
            .points
            .values()
            .filter(|point| filter.matches(&point.payload))
            .cloned()
            .collect())
    }

    async fn update_path(
        &self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<u64, EngineError> {
        let mut collections = self.collections.lock().await;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut updated = 0u64;
        for point in target.points.values_mut() {
            if point.payload.relative_path == from {
                point.payload.relative_path = to.to_string();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn collection_model(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionModel>, EngineError> {
        let collections = self.collections.lock().await;
        Ok(collections.get(collection).map(|c| c.model.clone()))
    }

    async fn reachable(&self) -> bool {
        true
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
