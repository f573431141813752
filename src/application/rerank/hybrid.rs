use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::application::interfaces::Reranker;
use crate::domain::{EngineError, Hit};

/// Runs a primary reranker under a latency budget and falls back to a
/// cheaper strategy on timeout or error. The fallback is expected to be
/// infallible in practice (TF-IDF).
pub struct HybridReranker {
    primary: Arc<dyn Reranker>,
    fallback: Arc<dyn Reranker>,
    budget: Duration,
    name: String,
}

impl HybridReranker {
    pub fn new(primary: Arc<dyn Reranker>, fallback: Arc<dyn Reranker>, budget: Duration) -> Self {
        let name = format!("hybrid({}->{})", primary.name(), fallback.name());
        Self {
            primary,
            fallback,
            budget,
            name,
        }
    }
}

#[async_trait]
impl Reranker for HybridReranker {
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<Hit>,
        top_k: usize,
    ) -> Result<Vec<Hit>, EngineError> {
        let attempt = tokio::time::timeout(
            self.budget,
            self.primary.rerank(query, hits.clone(), top_k),
        )
        .await;

        match attempt {
            Ok(Ok(ranked)) => Ok(ranked),
            Ok(Err(e)) => {
                warn!(
                    "Primary reranker {} failed ({}); falling back to {}",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                self.fallback.rerank(query, hits, top_k).await
            }
            Err(_) => {
                warn!(
                    "Primary reranker {} exceeded {:?}; falling back to {}",
                    self.primary.name(),
                    self.budget,
                    self.fallback.name()
                );
                self.fallback.rerank(query, hits, top_k).await
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::rerank::TfIdfReranker;
    use crate::domain::HitSource;

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(
            &self,
            _query: &str,
            _hits: Vec<Hit>,
            _top_k: usize,
        ) -> Result<Vec<Hit>, EngineError> {
            Err(EngineError::internal("model missing"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct SlowReranker;

    #[async_trait]
    impl Reranker for SlowReranker {
        async fn rerank(
            &self,
            _query: &str,
            hits: Vec<Hit>,
            _top_k: usize,
        ) -> Result<Vec<Hit>, EngineError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(hits)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn hits() -> Vec<Hit> {
        vec![Hit::new("a.rs", 1, 1, "query text", 0.5, HitSource::FtsCode)]
    }

    #[tokio::test]
    async fn test_falls_back_on_error() {
        let hybrid = HybridReranker::new(
            Arc::new(FailingReranker),
            Arc::new(TfIdfReranker::new()),
            Duration::from_millis(100),
        );
        let ranked = hybrid.rerank("query", hits(), 10).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].source, HitSource::Rerank);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_on_timeout() {
        let hybrid = HybridReranker::new(
            Arc::new(SlowReranker),
            Arc::new(TfIdfReranker::new()),
            Duration::from_millis(100),
        );
        let ranked = hybrid.rerank("query", hits(), 10).await.unwrap();
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_name_reflects_chain() {
        let hybrid = HybridReranker::new(
            Arc::new(TfIdfReranker::new()),
            Arc::new(TfIdfReranker::new()),
            Duration::from_millis(100),
        );
        assert_eq!(hybrid.name(), "hybrid(tfidf->tfidf)");
    }
}
