use async_trait::async_trait;

use crate::domain::EngineError;

/// Whether a text is indexed content or a query; asymmetric models embed
/// the two differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    Code,
    Query,
}

impl EmbedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedKind::Code => "code",
            EmbedKind::Query => "query",
        }
    }
}

/// Generates vector embeddings. An opaque collaborator: the engine only
/// cares that it reports a stable `(model_id, dim)` pair.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Vec<f32>>, EngineError>;

    fn model_id(&self) -> &str;

    fn dim(&self) -> usize;
}
