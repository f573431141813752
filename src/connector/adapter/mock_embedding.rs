use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::application::interfaces::{EmbedKind, EmbeddingProvider};
use crate::domain::EngineError;

/// Deterministic offline embedding provider: vectors are seeded from the
/// text hash, so identical text always embeds identically. Lets the whole
/// semantic path run without a model or network.
pub struct MockEmbedding {
    model_id: String,
    dimensions: usize,
    calls: AtomicU64,
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(384)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            model_id: "mock-embedding".to_string(),
            dimensions,
            calls: AtomicU64::new(0),
        }
    }

    /// Provider invocations so far; tests assert moves embed nothing.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut vector {
                *x /= magnitude;
            }
        }
        vector
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[String], _kind: EmbedKind) -> Result<Vec<Vec<f32>>, EngineError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(texts.iter().map(|text| self.generate(text)).collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedding_consistency() {
        let provider = MockEmbedding::new();
        let a = provider
            .embed(&["hello world".to_string()], EmbedKind::Code)
            .await
            .unwrap();
        let b = provider
            .embed(&["hello world".to_string()], EmbedKind::Code)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_mock_embedding_dimensions() {
        let provider = MockEmbedding::with_dimensions(128);
        let vectors = provider
            .embed(&["test".to_string()], EmbedKind::Query)
            .await
            .unwrap();
        assert_eq!(vectors[0].len(), 128);
        assert_eq!(provider.dim(), 128);
    }

    #[tokio::test]
    async fn test_mock_embedding_normalized() {
        let provider = MockEmbedding::new();
        let vectors = provider
            .embed(&["test".to_string()], EmbedKind::Code)
            .await
            .unwrap();
        let magnitude: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_call_counter() {
        let provider = MockEmbedding::new();
        assert_eq!(provider.call_count(), 0);
        provider
            .embed(&["a".to_string(), "b".to_string()], EmbedKind::Code)
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 1, "one call per batch");
    }
}
