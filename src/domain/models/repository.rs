use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::EngineError;
use crate::domain::identity;

/// One indexed repository. The id is derived from the first git remote (or
/// a hash of the canonical root when there is none), so the same checkout
/// cloned elsewhere produces the same id. The root is local-machine state
/// and is never persisted inside the portable index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    id: String,
    #[serde(skip)]
    root: PathBuf,
}

impl Repository {
    /// Open a repository at `root`, deriving its stable id.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, EngineError> {
        let root = root.as_ref().canonicalize()?;
        let id = identity::repository_id(&root);
        Ok(Self { id, root })
    }

    /// Reconstitutes from persisted data (used by adapters).
    pub fn reconstitute(id: String, root: PathBuf) -> Self {
        Self { id, root }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve any path to this repository's relative key.
    pub fn resolve(&self, any_path: impl AsRef<Path>) -> Result<String, EngineError> {
        identity::resolve(&self.root, any_path.as_ref())
    }

    pub fn absolute(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_derives_stable_id() {
        let dir = tempfile::tempdir().unwrap();
        let a = Repository::open(dir.path()).unwrap();
        let b = Repository::open(dir.path()).unwrap();
        assert_eq!(a.id(), b.id());
        assert!(!a.id().is_empty());
    }

    #[test]
    fn test_resolve_rejects_outside_paths() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        let err = repo.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, EngineError::OutsidePath(_)));
    }
}
