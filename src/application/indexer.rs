//! Indexing engine: drives `files on disk → storage` with at-most-once
//! semantics per content. Reads and parses run on a bounded worker pool;
//! commits serialize through the single-writer store.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::application::config::EngineConfig;
use crate::application::embedder::EmbeddingPipeline;
use crate::application::interfaces::{IndexStore, ParseResult, Plugin, WriteOp};
use crate::application::registry::PluginRegistry;
use crate::domain::{
    identity, EngineError, HashCache, IndexReport, Repository, SourceFile,
};

/// Ignore file honored at the repository root, gitignore syntax.
pub const IGNORE_FILE: &str = ".codeintelignore";

const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
];

const IGNORED_EXTENSIONS: &[&str] = &[
    // binaries
    "exe", "dll", "so", "dylib", "a", "o", "obj", "bin", "class", "pyc", "wasm",
    // archives
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "jar",
    // media
    "png", "jpg", "jpeg", "gif", "ico", "pdf", "woff", "woff2", "ttf", "mp4", "mp3",
    // databases
    "db", "sqlite", "parquet",
];

/// Built-in defaults applied before the user's ignore file: VCS and build
/// directories, binaries, archives, minified assets.
pub fn default_ignored(relative_path: &str) -> bool {
    let lower = relative_path.to_lowercase();
    for segment in lower.split('/') {
        if IGNORED_DIRS.contains(&segment) {
            return true;
        }
    }
    if lower.ends_with(".min.js") || lower.ends_with(".min.css") {
        return true;
    }
    if let Some(ext) = lower.rsplit('.').next() {
        if IGNORED_EXTENSIONS.contains(&ext) {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub force: bool,
    /// Restrict the batch to these paths (absolute or repo-relative).
    pub paths: Option<Vec<PathBuf>>,
}

/// Outcome of indexing one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Indexed,
    Unchanged,
    Skipped(String),
    Errored(String),
}

pub struct IndexingEngine {
    store: Arc<dyn IndexStore>,
    registry: Arc<PluginRegistry>,
    fallback: Arc<dyn Plugin>,
    embedder: Option<Arc<EmbeddingPipeline>>,
    hashes: Arc<HashCache>,
    config: EngineConfig,
}

impl IndexingEngine {
    pub fn new(
        store: Arc<dyn IndexStore>,
        registry: Arc<PluginRegistry>,
        fallback: Arc<dyn Plugin>,
        embedder: Option<Arc<EmbeddingPipeline>>,
        config: EngineConfig,
    ) -> Self {
        let hashes = Arc::new(HashCache::new(config.hash_cache_capacity));
        Self {
            store,
            registry,
            fallback,
            embedder,
            hashes,
            config,
        }
    }

    pub fn hashes(&self) -> &Arc<HashCache> {
        &self.hashes
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Index a repository: enumerate the working tree, reconcile the store
    /// against it, and run changed files through the worker pool. Individual
    /// file failures land in the report and never abort the batch.
    pub async fn index_repository(
        &self,
        repo: &Repository,
        options: &IndexOptions,
    ) -> Result<IndexReport, EngineError> {
        if !self.store.has_repository(repo.id()).await? {
            let mut batch = self.store.begin_write();
            batch.push(WriteOp::UpsertRepository(repo.clone()));
            self.store.commit(batch).await?;
        }

        let files = self.enumerate(repo, options)?;
        info!("Indexing {}: {} candidate files", repo.id(), files.len());

        // Reconciliation: rows whose paths vanished from disk are removed,
        // unless the batch was restricted to explicit paths.
        let mut deleted = 0u64;
        if options.paths.is_none() {
            let on_disk: std::collections::HashSet<String> = files
                .iter()
                .filter_map(|p| repo.resolve(p).ok())
                .collect();
            for stored in self.store.list_files(repo.id()).await? {
                if !on_disk.contains(stored.relative_path()) {
                    debug!("Reconciliation: removing {}", stored.relative_path());
                    let mut batch = self.store.begin_write();
                    batch.push(WriteOp::DeleteFile {
                        repository_id: repo.id().to_string(),
                        relative_path: stored.relative_path().to_string(),
                    });
                    self.store.commit(batch).await?;
                    if let Some(embedder) = &self.embedder {
                        if let Err(e) = embedder.delete_file(stored.relative_path()).await {
                            warn!("Vector delete for {} failed: {}", stored.relative_path(), e);
                        }
                    }
                    deleted += 1;
                }
            }
        }

        let force = options.force;
        let outcomes: Vec<(String, FileOutcome)> = stream::iter(files)
            .map(|path| async move {
                let relative = repo
                    .resolve(&path)
                    .unwrap_or_else(|_| path.display().to_string());
                let outcome = self.index_file(repo, &path, force).await;
                (relative, outcome)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut report = IndexReport::default();
        for (relative, outcome) in outcomes {
            match outcome {
                FileOutcome::Indexed => report.indexed += 1,
                FileOutcome::Unchanged => report.unchanged += 1,
                FileOutcome::Skipped(_) => report.skipped += 1,
                FileOutcome::Errored(reason) => report.record_error(relative, reason),
            }
        }

        if report.indexed > 0 || report.errored > 0 || deleted > 0 {
            let mut batch = self.store.begin_write();
            batch.push(WriteOp::TouchRepository {
                repository_id: repo.id().to_string(),
                last_indexed_ns: now_ns(),
            });
            self.store.commit(batch).await?;
        }

        info!(
            "Indexed {}: {} indexed, {} unchanged, {} skipped, {} errored, {} removed",
            repo.id(),
            report.indexed,
            report.unchanged,
            report.skipped,
            report.errored,
            deleted
        );
        Ok(report)
    }

    fn enumerate(
        &self,
        repo: &Repository,
        options: &IndexOptions,
    ) -> Result<Vec<PathBuf>, EngineError> {
        if let Some(paths) = &options.paths {
            let mut files = Vec::new();
            for path in paths {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    repo.root().join(path)
                };
                if absolute.is_dir() {
                    files.extend(self.walk(&absolute, repo)?);
                } else {
                    files.push(absolute);
                }
            }
            return Ok(files);
        }
        self.walk(repo.root(), repo)
    }

    fn walk(&self, root: &Path, repo: &Repository) -> Result<Vec<PathBuf>, EngineError> {
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .add_custom_ignore_filename(IGNORE_FILE)
            .follow_links(false)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking tree: {}", e);
                    continue;
                }
            };
            if !entry.path().is_file() {
                continue;
            }
            match repo.resolve(entry.path()) {
                Ok(relative) if !default_ignored(&relative) => {
                    files.push(entry.path().to_path_buf())
                }
                Ok(_) => {}
                // Symlinks resolving outside the root are not followed.
                Err(_) => {}
            }
        }
        Ok(files)
    }

    /// Index one file, end to end. Never returns `Err`: every failure mode
    /// collapses into a `FileOutcome` so batches keep going.
    pub async fn index_file(&self, repo: &Repository, path: &Path, force: bool) -> FileOutcome {
        let relative = match repo.resolve(path) {
            Ok(r) => r,
            Err(e) => return FileOutcome::Skipped(e.to_string()),
        };
        if default_ignored(&relative) {
            return FileOutcome::Skipped("ignored".to_string());
        }

        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => return FileOutcome::Errored(format!("stat failed: {}", e)),
        };
        let size = meta.len();
        let mtime_ns = identity::mtime_ns(&meta);
        if size > self.config.max_file_size {
            return FileOutcome::Skipped("too_large".to_string());
        }

        let existing = match self.store.find_file(repo.id(), &relative).await {
            Ok(f) => f,
            Err(e) => return FileOutcome::Errored(e.to_string()),
        };
        if let Some(existing) = &existing {
            if !force && !existing.is_tombstoned() && existing.stat_matches(size, mtime_ns) {
                return FileOutcome::Unchanged;
            }
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => Arc::new(b),
            Err(e) => return FileOutcome::Errored(format!("read failed: {}", e)),
        };
        let content_hash = identity::hash_bytes(&bytes);

        if let Some(existing) = &existing {
            if !force && !existing.is_tombstoned() && existing.content_hash() == content_hash {
                // Bytes unchanged; refresh stat columns and stop.
                let mut batch = self.store.begin_write();
                batch.push(WriteOp::UpdateFileStat {
                    repository_id: repo.id().to_string(),
                    relative_path: relative.clone(),
                    size,
                    mtime_ns,
                });
                return match self.store.commit(batch).await {
                    Ok(()) => FileOutcome::Unchanged,
                    Err(e) => FileOutcome::Errored(e.to_string()),
                };
            }
        }

        let language = self.registry.language_for(&relative);
        let dedicated = self.registry.acquire(&relative).await;
        // A known language whose plugin is unavailable (cooldown, load
        // timeout) indexes opaquely: FTS only, no symbols.
        let opaque = dedicated.is_none() && language.is_known();
        let plugin = dedicated.unwrap_or_else(|| self.fallback.clone());

        let mut index_error: Option<String> = None;
        let parsed = match self.parse_bounded(plugin.clone(), &bytes, &relative).await {
            Ok(result) => result,
            Err(first_error) => {
                debug!(
                    "Parser for {} failed ({}); demoting to fallback",
                    relative, first_error
                );
                index_error = Some(first_error.to_string());
                match self
                    .parse_bounded(self.fallback.clone(), &bytes, &relative)
                    .await
                {
                    Ok(result) => result,
                    Err(second_error) => {
                        index_error = Some(format!("{}; fallback: {}", first_error, second_error));
                        ParseResult::default()
                    }
                }
            }
        };

        let symbols = if opaque { Vec::new() } else { parsed.symbols };
        let chunks = parsed.chunks;

        let code_text = String::from_utf8_lossy(&bytes).into_owned();
        let symbol_text = symbols
            .iter()
            .map(|s| s.fts_line())
            .collect::<Vec<_>>()
            .join("\n");

        let mut file = SourceFile::new(
            repo.id(),
            relative.clone(),
            content_hash,
            language,
            size,
            mtime_ns,
        )
        .with_last_indexed_ns(now_ns());
        let errored = index_error.is_some();
        if let Some(error) = &index_error {
            file = file.with_index_error(error.clone());
        }

        let mut batch = self.store.begin_write();
        batch.push(WriteOp::UpsertFile {
            file,
            symbols,
            code_text,
            symbol_text,
        });
        if let Err(e) = self.store.commit(batch).await {
            return FileOutcome::Errored(e.to_string());
        }

        if let Some(embedder) = &self.embedder {
            if !chunks.is_empty() || existing.is_some() {
                if let Err(e) = embedder.sync_file(repo.id(), &relative, &chunks).await {
                    warn!("Vector sync for {} failed: {}", relative, e);
                }
            }
        }

        if errored {
            FileOutcome::Errored(index_error.unwrap_or_default())
        } else {
            FileOutcome::Indexed
        }
    }

    /// Run a parse on the blocking pool under the wall-clock bound, with
    /// panics converted into parse errors.
    async fn parse_bounded(
        &self,
        plugin: Arc<dyn Plugin>,
        bytes: &Arc<Vec<u8>>,
        relative: &str,
    ) -> Result<ParseResult, EngineError> {
        let bytes = bytes.clone();
        let relative = relative.to_string();
        let task = tokio::task::spawn_blocking(move || {
            catch_unwind(AssertUnwindSafe(|| plugin.parse(&bytes, &relative)))
                .unwrap_or_else(|_| Err(EngineError::parse("parser panicked")))
        });

        match tokio::time::timeout(self.config.parse_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(EngineError::internal(format!("parse task failed: {}", join))),
            Err(_) => Err(EngineError::timeout("parse exceeded wall-clock bound")),
        }
    }

    /// Soft-delete a path, returning the stored content hash for tombstone
    /// bookkeeping. A miss is not an error.
    pub async fn soft_delete(
        &self,
        repo: &Repository,
        relative_path: &str,
    ) -> Result<Option<String>, EngineError> {
        let stored = self.store.find_file(repo.id(), relative_path).await?;
        let Some(stored) = stored else {
            return Ok(None);
        };
        let mut batch = self.store.begin_write();
        batch.push(WriteOp::SoftDeleteFile {
            repository_id: repo.id().to_string(),
            relative_path: relative_path.to_string(),
            deleted_ns: now_ns(),
        });
        self.store.commit(batch).await?;
        Ok(Some(stored.content_hash().to_string()))
    }

    /// Hard-delete a path everywhere: store cascade plus vector points.
    pub async fn hard_delete(
        &self,
        repo: &Repository,
        relative_path: &str,
    ) -> Result<(), EngineError> {
        let mut batch = self.store.begin_write();
        batch.push(WriteOp::DeleteFile {
            repository_id: repo.id().to_string(),
            relative_path: relative_path.to_string(),
        });
        self.store.commit(batch).await?;
        if let Some(embedder) = &self.embedder {
            embedder.delete_file(relative_path).await?;
        }
        Ok(())
    }

    /// Rename a file whose content is unchanged: storage rename plus vector
    /// payload update, no parsing and no embedding.
    pub async fn rename(
        &self,
        repo: &Repository,
        from: &str,
        to: &str,
    ) -> Result<(), EngineError> {
        let mut batch = self.store.begin_write();
        batch.push(WriteOp::RenameFile {
            repository_id: repo.id().to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self.store.commit(batch).await?;
        if let Some(embedder) = &self.embedder {
            embedder.rename_file(from, to).await?;
        }
        info!("Renamed {} -> {}", from, to);
        Ok(())
    }
}

pub(crate) fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ignored_directories() {
        assert!(default_ignored(".git/config"));
        assert!(default_ignored("node_modules/lodash/index.js"));
        assert!(default_ignored("target/debug/app"));
        assert!(!default_ignored("src/main.rs"));
    }

    #[test]
    fn test_default_ignored_extensions() {
        assert!(default_ignored("assets/logo.png"));
        assert!(default_ignored("release.tar"));
        assert!(default_ignored("vendor/app.min.js"));
        assert!(!default_ignored("styles/app.css"));
    }

    #[test]
    fn test_case_insensitive_matching() {
        assert!(default_ignored("Assets/Logo.PNG"));
        assert!(default_ignored("NODE_MODULES/x.js"));
    }
}
