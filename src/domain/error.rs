use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Path outside repository: {0}")]
    OutsidePath(String),

    #[error("Schema mismatch: store has version {found}, this build supports {supported}")]
    SchemaMismatch { found: u32, supported: u32 },

    #[error("Model mismatch: collection uses {found}, query-time model is {expected}")]
    ModelMismatch { expected: String, found: String },

    #[error("Repository not indexed: {0}")]
    RepositoryNotIndexed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Vector store error: {0}")]
    VectorStoreError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn outside_path(msg: impl Into<String>) -> Self {
        Self::OutsidePath(msg.into())
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingError(msg.into())
    }

    pub fn vector(msg: impl Into<String>) -> Self {
        Self::VectorStoreError(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }

    pub fn is_model_mismatch(&self) -> bool {
        matches!(self, Self::ModelMismatch { .. })
    }

    /// Errors that degrade a query rather than failing it: the affected
    /// backend is skipped and the response carries `degraded=true`.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::VectorStoreError(_) | Self::EmbeddingError(_) | Self::Timeout(_)
        )
    }
}
