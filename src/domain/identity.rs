//! Path and identity model: every file is keyed by a normalized
//! repository-relative path plus a content hash, so an index built on one
//! machine resolves identically on another checkout of the same commit.

use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::domain::error::EngineError;

/// Convert `any_path` into the repository-relative, forward-slash key.
///
/// Symlinks are expanded before the containment check, so a link pointing
/// out of the repository is rejected rather than followed.
pub fn resolve(repo_root: &Path, any_path: &Path) -> Result<String, EngineError> {
    let root = repo_root
        .canonicalize()
        .map_err(|e| EngineError::outside_path(format!("{}: {}", repo_root.display(), e)))?;

    let absolute = if any_path.is_absolute() {
        any_path.to_path_buf()
    } else {
        root.join(any_path)
    };

    // canonicalize() expands symlinks but requires the file to exist; a
    // just-deleted path falls back to canonicalizing its parent so the
    // containment check still sees through directory symlinks.
    let expanded = match absolute.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            let normalized = normalize_lexically(&absolute);
            match (normalized.parent(), normalized.file_name()) {
                (Some(parent), Some(name)) => match parent.canonicalize() {
                    Ok(parent) => parent.join(name),
                    Err(_) => normalized,
                },
                _ => normalized,
            }
        }
    };

    let relative = expanded
        .strip_prefix(&root)
        .map_err(|_| EngineError::outside_path(expanded.display().to_string()))?;

    if relative.as_os_str().is_empty() {
        return Err(EngineError::outside_path(
            "path resolves to the repository root itself".to_string(),
        ));
    }

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(EngineError::outside_path(expanded.display().to_string())),
        }
    }
    Ok(parts.join("/"))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Sha-256 hex of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("{:x}", hash)
}

/// Nanosecond mtime of a metadata record, 0 when the platform withholds it.
pub fn mtime_ns(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Stable repository identifier: the first git remote URL normalized to
/// `host/owner/name`, or a hash of the canonical root when no remote exists.
pub fn repository_id(repo_root: &Path) -> String {
    if let Some(url) = first_git_remote(repo_root) {
        if let Some(id) = normalize_remote_url(&url) {
            return id;
        }
    }
    let canonical = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let digest = hash_bytes(canonical.to_string_lossy().as_bytes());
    format!("local/{}", &digest[..16])
}

fn first_git_remote(repo_root: &Path) -> Option<String> {
    let config = std::fs::read_to_string(repo_root.join(".git/config")).ok()?;
    let mut in_remote = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_remote = line.starts_with("[remote ");
            continue;
        }
        if in_remote {
            if let Some(rest) = line.strip_prefix("url") {
                let rest = rest.trim_start();
                if let Some(value) = rest.strip_prefix('=') {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

/// Normalize the common remote URL shapes to `host/owner/name`.
pub fn normalize_remote_url(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);

    // scp-like: git@host:owner/name
    if let Some(rest) = url.strip_prefix("git@") {
        let (host, path) = rest.split_once(':')?;
        return Some(format!("{}/{}", host, path.trim_start_matches('/')));
    }

    // scheme://[user@]host[:port]/owner/name
    if let Some((_, rest)) = url.split_once("://") {
        let rest = rest.rsplit_once('@').map(|(_, r)| r).unwrap_or(rest);
        let (host, path) = rest.split_once('/')?;
        let host = host.split_once(':').map(|(h, _)| h).unwrap_or(host);
        if path.is_empty() {
            return None;
        }
        return Some(format!("{}/{}", host, path));
    }

    // Already host/owner/name
    if url.splitn(3, '/').count() == 3 {
        return Some(url.to_string());
    }
    None
}

type StatKey = (PathBuf, u64, i64);

/// Content hashes keyed by `(path, size, mtime_ns)` with a bounded LRU, so
/// unchanged files are never re-read just to recompute a known hash.
pub struct HashCache {
    inner: Mutex<LruCache<StatKey, String>>,
}

impl HashCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Hash the file at `path`, consulting the stat-keyed cache first.
    pub fn content_hash(&self, path: &Path) -> Result<String, EngineError> {
        let meta = std::fs::metadata(path)?;
        let key = (path.to_path_buf(), meta.len(), mtime_ns(&meta));

        if let Ok(mut cache) = self.inner.lock() {
            if let Some(hash) = cache.get(&key) {
                return Ok(hash.clone());
            }
        }

        let bytes = std::fs::read(path)?;
        let hash = hash_bytes(&bytes);

        if let Ok(mut cache) = self.inner.lock() {
            cache.put(key, hash.clone());
        }
        Ok(hash)
    }

    /// Drop any cached entry for `path`; called by the watcher on writes.
    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut cache) = self.inner.lock() {
            let stale: Vec<StatKey> = cache
                .iter()
                .filter(|(key, _)| key.0 == path)
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_normalizes_separators() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/lex")).unwrap();
        std::fs::write(dir.path().join("src/lex/parser.py"), "x").unwrap();

        let relative = resolve(dir.path(), &dir.path().join("src/lex/parser.py")).unwrap();
        assert_eq!(relative, "src/lex/parser.py");

        let via_dots = resolve(dir.path(), &dir.path().join("src/./lex/../lex/parser.py")).unwrap();
        assert_eq!(via_dots, "src/lex/parser.py");
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(dir.path(), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, EngineError::OutsidePath(_)));

        let err = resolve(dir.path(), &dir.path().join("../sibling.rs")).unwrap_err();
        assert!(matches!(err, EngineError::OutsidePath(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_out_of_root() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.rs"), "x").unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.rs"), dir.path().join("link.rs"))
            .unwrap();

        let err = resolve(dir.path(), &dir.path().join("link.rs")).unwrap_err();
        assert!(matches!(err, EngineError::OutsidePath(_)));
    }

    #[test]
    fn test_normalize_remote_urls() {
        assert_eq!(
            normalize_remote_url("git@github.com:owner/name.git").as_deref(),
            Some("github.com/owner/name")
        );
        assert_eq!(
            normalize_remote_url("https://github.com/owner/name.git").as_deref(),
            Some("github.com/owner/name")
        );
        assert_eq!(
            normalize_remote_url("ssh://git@gitlab.com:2222/owner/name").as_deref(),
            Some("gitlab.com/owner/name")
        );
        assert_eq!(normalize_remote_url("not-a-url"), None);
    }

    #[test]
    fn test_repository_id_reads_git_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(
            dir.path().join(".git/config"),
            "[core]\n\trepositoryformatversion = 0\n[remote \"origin\"]\n\turl = git@github.com:owner/name.git\n\tfetch = +refs/heads/*:refs/remotes/origin/*\n",
        )
        .unwrap();

        assert_eq!(repository_id(dir.path()), "github.com/owner/name");
    }

    #[test]
    fn test_repository_id_without_remote_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = repository_id(dir.path());
        let b = repository_id(dir.path());
        assert_eq!(a, b);
        assert!(a.starts_with("local/"));
    }

    #[test]
    fn test_hash_cache_returns_cached_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.rs");
        std::fs::write(&path, "fn main() {}").unwrap();

        let cache = HashCache::new(16);
        let first = cache.content_hash(&path).unwrap();
        let second = cache.content_hash(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, hash_bytes(b"fn main() {}"));
    }
}
