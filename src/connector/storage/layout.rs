//! On-disk layout of one repository's index: `current.db` (the relational/
//! FTS store), `metadata.json` describing how the index was built, and an
//! optional `vector/` subtree owned by the vector store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::application::interfaces::CollectionModel;
use crate::domain::EngineError;

pub const DB_FILE: &str = "current.db";
pub const METADATA_FILE: &str = "metadata.json";
pub const VECTOR_DIR: &str = "vector";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub schema_version: u32,
    pub repository_id: String,
    pub created_ns: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_commit: Option<String>,
    #[serde(default)]
    pub plugin_versions: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<CollectionModel>,
}

/// One directory per repository; portable given a checkout of the same
/// `source_commit`.
pub struct IndexLayout {
    dir: PathBuf,
}

impl IndexLayout {
    /// Create the directory and write `metadata.json` if this is a fresh
    /// index; an existing metadata file is left untouched.
    pub fn prepare(
        dir: impl Into<PathBuf>,
        repository_id: &str,
        repo_root: &Path,
        schema_version: u32,
        plugin_versions: BTreeMap<String, String>,
        embedding: Option<CollectionModel>,
    ) -> Result<Self, EngineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.exists() {
            let metadata = IndexMetadata {
                schema_version,
                repository_id: repository_id.to_string(),
                created_ns: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos() as i64)
                    .unwrap_or(0),
                source_commit: source_commit(repo_root),
                plugin_versions,
                embedding,
            };
            let json = serde_json::to_string_pretty(&metadata)
                .map_err(|e| EngineError::internal(format!("metadata serialization: {}", e)))?;
            std::fs::write(&metadata_path, json)?;
        }

        Ok(Self { dir })
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join(DB_FILE)
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.dir.join(VECTOR_DIR)
    }

    pub fn metadata(&self) -> Result<IndexMetadata, EngineError> {
        let raw = std::fs::read_to_string(self.dir.join(METADATA_FILE))?;
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::storage(format!("corrupt metadata.json: {}", e)))
    }
}

/// The commit the working tree points at, when the root is a git checkout.
fn source_commit(repo_root: &Path) -> Option<String> {
    let head = std::fs::read_to_string(repo_root.join(".git/HEAD")).ok()?;
    let head = head.trim();
    if let Some(reference) = head.strip_prefix("ref: ") {
        let commit = std::fs::read_to_string(repo_root.join(".git").join(reference)).ok()?;
        return Some(commit.trim().to_string());
    }
    (!head.is_empty()).then(|| head.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_writes_metadata_once() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();

        let layout = IndexLayout::prepare(
            index.path().join("idx"),
            "test/repo",
            repo.path(),
            1,
            BTreeMap::new(),
            None,
        )
        .unwrap();

        let metadata = layout.metadata().unwrap();
        assert_eq!(metadata.repository_id, "test/repo");
        assert_eq!(metadata.schema_version, 1);
        let created = metadata.created_ns;

        // Second prepare keeps the original metadata.
        let layout = IndexLayout::prepare(
            index.path().join("idx"),
            "test/repo",
            repo.path(),
            1,
            BTreeMap::new(),
            None,
        )
        .unwrap();
        assert_eq!(layout.metadata().unwrap().created_ns, created);
    }

    #[test]
    fn test_source_commit_from_detached_head() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join(".git")).unwrap();
        std::fs::write(repo.path().join(".git/HEAD"), "abc123def\n").unwrap();
        assert_eq!(source_commit(repo.path()).as_deref(), Some("abc123def"));
    }
}
