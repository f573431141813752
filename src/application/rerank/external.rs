use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::interfaces::Reranker;
use crate::domain::{EngineError, Hit, HitSource};

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: Vec<&'a str>,
    top_k: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    /// One relevance score per input document, same order.
    scores: Vec<f32>,
}

/// Reranker backed by an external HTTP scoring service. Higher latency than
/// the in-process strategy but model-quality relevance; callers wrap it in
/// the hybrid chain so its failures degrade instead of propagating.
pub struct ExternalReranker {
    client: reqwest::Client,
    endpoint: String,
}

impl ExternalReranker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Reranker for ExternalReranker {
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<Hit>,
        top_k: usize,
    ) -> Result<Vec<Hit>, EngineError> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let request = RerankRequest {
            query,
            documents: hits.iter().map(|h| h.snippet.as_str()).collect(),
            top_k,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::internal(format!("reranker request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::internal(format!("reranker returned error: {}", e)))?;

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| EngineError::internal(format!("invalid reranker response: {}", e)))?;

        if body.scores.len() != hits.len() {
            return Err(EngineError::internal(format!(
                "reranker returned {} scores for {} documents",
                body.scores.len(),
                hits.len()
            )));
        }

        debug!("External reranker scored {} hits", hits.len());

        let mut ranked: Vec<(usize, Hit, f32)> = hits
            .into_iter()
            .zip(body.scores)
            .enumerate()
            .map(|(rank, (hit, score))| (rank, hit, score))
            .collect();
        ranked.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|(_, mut hit, score)| {
                hit.score = score;
                hit.source = HitSource::Rerank;
                hit
            })
            .collect())
    }

    fn name(&self) -> &str {
        "external"
    }
}
