use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::interfaces::{EmbedKind, EmbeddingProvider};
use crate::domain::EngineError;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    kind: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding provider speaking a minimal JSON contract:
/// `POST {endpoint} {model, input, kind}` → `{embeddings: [[f32]]}`.
/// The provider's protocol beyond that is its own business.
pub struct HttpEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model_id: String,
    dimensions: usize,
}

impl HttpEmbedding {
    pub fn new(
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model_id: model_id.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Vec<f32>>, EngineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model_id,
            input: texts,
            kind: kind.as_str(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::embedding(format!("provider request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::embedding(format!("provider returned error: {}", e)))?;

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EngineError::embedding(format!("invalid provider response: {}", e)))?;

        if body.embeddings.len() != texts.len() {
            return Err(EngineError::embedding(format!(
                "provider returned {} vectors for {} texts",
                body.embeddings.len(),
                texts.len()
            )));
        }
        for vector in &body.embeddings {
            if vector.len() != self.dimensions {
                return Err(EngineError::embedding(format!(
                    "provider returned dim {} but {} was configured",
                    vector.len(),
                    self.dimensions
                )));
            }
        }

        debug!("Embedded {} texts via {}", texts.len(), self.endpoint);
        Ok(body.embeddings)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dimensions
    }
}
