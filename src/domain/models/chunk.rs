use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A bounded slice of a file, the unit of embedding. Transient: chunks are
/// produced by parsing and live only until their vectors are upserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    relative_path: String,
    start_line: u32,
    end_line: u32,
    text: String,
    chunk_hash: String,
}

impl Chunk {
    pub fn new(
        relative_path: impl Into<String>,
        start_line: u32,
        end_line: u32,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let chunk_hash = hash_text(&text);
        Self {
            relative_path: relative_path.into(),
            start_line,
            end_line,
            text,
            chunk_hash,
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunk_hash(&self) -> &str {
        &self.chunk_hash
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Deterministic vector-store point id. Re-indexing a file reproduces
    /// the same ids, so upserts replace rather than duplicate.
    pub fn point_id(repository_id: &str, relative_path: &str, chunk_index: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(repository_id.as_bytes());
        hasher.update(b":");
        hasher.update(relative_path.as_bytes());
        hasher.update(b":");
        hasher.update(chunk_index.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Sha-256 hex of chunk text; the skip key for re-embedding.
pub fn hash_text(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    format!("{:x}", hash)
}
