use async_trait::async_trait;

use crate::domain::{EngineError, Hit};

/// Post-filters an ordered hit list to improve relevance under a latency
/// budget. Deterministic scoring must yield deterministic output; ties keep
/// the incoming order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<Hit>,
        top_k: usize,
    ) -> Result<Vec<Hit>, EngineError>;

    /// Strategy name, for logging and status output.
    fn name(&self) -> &str;
}
