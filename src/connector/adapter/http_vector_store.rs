//! REST vector store adapter. Speaks a small qdrant-style contract; the
//! server owns the index internals, this side only ensures collections,
//! upserts points and queries by vector or payload filter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::application::interfaces::{
    ChunkPayload, CollectionModel, PointFilter, ScoredPoint, VectorPoint, VectorStore,
};
use crate::domain::EngineError;

pub struct HttpVectorStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct WirePoint<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: &'a ChunkPayload,
}

#[derive(Deserialize)]
struct WireScored {
    id: String,
    score: f32,
    payload: ChunkPayload,
}

#[derive(Deserialize)]
struct WireStored {
    id: String,
    vector: Vec<f32>,
    payload: ChunkPayload,
}

#[derive(Deserialize)]
struct SearchBody {
    result: Vec<WireScored>,
}

#[derive(Deserialize)]
struct ScrollBody {
    points: Vec<WireStored>,
}

#[derive(Deserialize)]
struct DeleteBody {
    deleted: u64,
}

#[derive(Deserialize)]
struct CollectionBody {
    model_id: String,
    dim: usize,
}

impl HttpVectorStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn filter_json(filter: &PointFilter) -> serde_json::Value {
        match &filter.relative_path {
            Some(path) => json!({ "relative_path": path }),
            None => json!({}),
        }
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn ensure_collection(
        &self,
        collection: &str,
        model: &CollectionModel,
    ) -> Result<(), EngineError> {
        if let Some(existing) = self.collection_model(collection).await? {
            if existing != *model {
                return Err(EngineError::ModelMismatch {
                    expected: format!("{} (dim {})", model.model_id, model.dim),
                    found: format!("{} (dim {})", existing.model_id, existing.dim),
                });
            }
            return Ok(());
        }

        self.client
            .post(self.url("collections"))
            .json(&json!({
                "name": collection,
                "dim": model.dim,
                "metric": "cosine",
                "model_id": model.model_id,
            }))
            .send()
            .await
            .map_err(|e| EngineError::vector(format!("create collection failed: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::vector(format!("create collection rejected: {}", e)))?;

        debug!("Created collection {} (dim {})", collection, model.dim);
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), EngineError> {
        if points.is_empty() {
            return Ok(());
        }
        let wire: Vec<WirePoint> = points
            .iter()
            .map(|p| WirePoint {
                id: &p.id,
                vector: &p.vector,
                payload: &p.payload,
            })
            .collect();

        self.client
            .post(self.url(&format!("collections/{}/points/upsert", collection)))
            .json(&json!({ "points": wire }))
            .send()
            .await
            .map_err(|e| EngineError::vector(format!("upsert failed: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::vector(format!("upsert rejected: {}", e)))?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&PointFilter>,
    ) -> Result<Vec<ScoredPoint>, EngineError> {
        let mut body = json!({ "vector": vector, "limit": k });
        if let Some(filter) = filter {
            body["filter"] = Self::filter_json(filter);
        }

        let response = self
            .client
            .post(self.url(&format!("collections/{}/points/search", collection)))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::vector(format!("search failed: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::vector(format!("search rejected: {}", e)))?;

        let body: SearchBody = response
            .json()
            .await
            .map_err(|e| EngineError::vector(format!("invalid search response: {}", e)))?;

        Ok(body
            .result
            .into_iter()
            .map(|p| ScoredPoint {
                id: p.id,
                score: p.score.clamp(0.0, 1.0),
                payload: p.payload,
            })
            .collect())
    }

    async fn delete(&self, collection: &str, filter: &PointFilter) -> Result<u64, EngineError> {
        let response = self
            .client
            .post(self.url(&format!("collections/{}/points/delete", collection)))
            .json(&json!({ "filter": Self::filter_json(filter) }))
            .send()
            .await
            .map_err(|e| EngineError::vector(format!("delete failed: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::vector(format!("delete rejected: {}", e)))?;

        let body: DeleteBody = response
            .json()
            .await
            .map_err(|e| EngineError::vector(format!("invalid delete response: {}", e)))?;
        Ok(body.deleted)
    }

    async fn fetch(
        &self,
        collection: &str,
        filter: &PointFilter,
    ) -> Result<Vec<VectorPoint>, EngineError> {
        let response = self
            .client
            .post(self.url(&format!("collections/{}/points/scroll", collection)))
            .json(&json!({ "filter": Self::filter_json(filter) }))
            .send()
            .await
            .map_err(|e| EngineError::vector(format!("scroll failed: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::vector(format!("scroll rejected: {}", e)))?;

        let body: ScrollBody = response
            .json()
            .await
            .map_err(|e| EngineError::vector(format!("invalid scroll response: {}", e)))?;

        Ok(body
            .points
            .into_iter()
            .map(|p| VectorPoint {
                id: p.id,
                vector: p.vector,
                payload: p.payload,
            })
            .collect())
    }

    async fn update_path(
        &self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<u64, EngineError> {
        // No server-side payload rewrite in the minimal contract: fetch the
        // affected points, rewrite locally, re-upsert under the same ids
        // (content-addressed ids make this a replace, not a duplicate).
        let mut points = self
            .fetch(collection, &PointFilter::by_path(from))
            .await?;
        let moved = points.len() as u64;
        if moved == 0 {
            return Ok(0);
        }
        for point in &mut points {
            point.payload.relative_path = to.to_string();
        }
        self.upsert(collection, points).await?;
        Ok(moved)
    }

    async fn collection_model(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionModel>, EngineError> {
        let response = self
            .client
            .get(self.url(&format!("collections/{}", collection)))
            .send()
            .await
            .map_err(|e| EngineError::vector(format!("collection probe failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| EngineError::vector(format!("collection probe rejected: {}", e)))?;
        let body: CollectionBody = response
            .json()
            .await
            .map_err(|e| EngineError::vector(format!("invalid collection response: {}", e)))?;
        Ok(Some(CollectionModel {
            model_id: body.model_id,
            dim: body.dim,
        }))
    }

    async fn reachable(&self) -> bool {
        let probe = self
            .client
            .get(self.url("healthz"))
            .timeout(Duration::from_secs(2))
            .send()
            .await;
        match probe {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Vector store unreachable: {}", e);
                false
            }
        }
    }
}
