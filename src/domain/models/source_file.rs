use serde::{Deserialize, Serialize};

use super::Language;

/// One indexed file, keyed by `(repository_id, relative_path)`.
///
/// `size` and `mtime_ns` drive the cheap change check; `content_hash` is the
/// authoritative one. A populated `deleted_ns` marks the row as tombstoned:
/// queries exclude it, and the watcher either revives it (rename) or
/// hard-deletes it when the tombstone expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    repository_id: String,
    relative_path: String,
    content_hash: String,
    language: Language,
    size: u64,
    mtime_ns: i64,
    index_error: Option<String>,
    last_indexed_ns: i64,
    deleted_ns: Option<i64>,
}

impl SourceFile {
    pub fn new(
        repository_id: impl Into<String>,
        relative_path: impl Into<String>,
        content_hash: impl Into<String>,
        language: Language,
        size: u64,
        mtime_ns: i64,
    ) -> Self {
        Self {
            repository_id: repository_id.into(),
            relative_path: relative_path.into(),
            content_hash: content_hash.into(),
            language,
            size,
            mtime_ns,
            index_error: None,
            last_indexed_ns: 0,
            deleted_ns: None,
        }
    }

    pub fn with_index_error(mut self, error: impl Into<String>) -> Self {
        self.index_error = Some(error.into());
        self
    }

    pub fn with_last_indexed_ns(mut self, ns: i64) -> Self {
        self.last_indexed_ns = ns;
        self
    }

    /// Reconstitutes from persisted data (used by adapters).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        repository_id: String,
        relative_path: String,
        content_hash: String,
        language: Language,
        size: u64,
        mtime_ns: i64,
        index_error: Option<String>,
        last_indexed_ns: i64,
        deleted_ns: Option<i64>,
    ) -> Self {
        Self {
            repository_id,
            relative_path,
            content_hash,
            language,
            size,
            mtime_ns,
            index_error,
            last_indexed_ns,
            deleted_ns,
        }
    }

    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime_ns(&self) -> i64 {
        self.mtime_ns
    }

    pub fn index_error(&self) -> Option<&str> {
        self.index_error.as_deref()
    }

    pub fn last_indexed_ns(&self) -> i64 {
        self.last_indexed_ns
    }

    pub fn deleted_ns(&self) -> Option<i64> {
        self.deleted_ns
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_ns.is_some()
    }

    /// True when the on-disk stat matches the stored one, allowing indexing
    /// to skip without re-hashing.
    pub fn stat_matches(&self, size: u64, mtime_ns: i64) -> bool {
        self.size == size && self.mtime_ns == mtime_ns
    }
}
