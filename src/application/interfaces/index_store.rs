use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, Hit, Repository, SourceFile, Symbol, SymbolKind};

/// Which FTS document set a search runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsMode {
    Code,
    Symbol,
}

/// A single mutation inside a write batch.
#[derive(Debug)]
pub enum WriteOp {
    UpsertRepository(Repository),
    /// Replace a file row and, in the same transaction, its symbols and
    /// both FTS documents.
    UpsertFile {
        file: SourceFile,
        symbols: Vec<Symbol>,
        code_text: String,
        symbol_text: String,
    },
    /// Refresh a file's stat columns after a content-hash match proved the
    /// bytes unchanged; symbols and FTS rows stay untouched.
    UpdateFileStat {
        repository_id: String,
        relative_path: String,
        size: u64,
        mtime_ns: i64,
    },
    /// Tombstone a file: excluded from queries, rows retained for revival.
    SoftDeleteFile {
        repository_id: String,
        relative_path: String,
        deleted_ns: i64,
    },
    /// Cascade-remove a file row with its symbols and FTS documents.
    DeleteFile {
        repository_id: String,
        relative_path: String,
    },
    /// Move a file to a new path, clearing any tombstone. Content rows
    /// (symbols, FTS bodies) are kept as-is.
    RenameFile {
        repository_id: String,
        from: String,
        to: String,
    },
    TouchRepository {
        repository_id: String,
        last_indexed_ns: i64,
    },
}

/// An accumulated set of mutations applied in one transaction by the single
/// writer. Dropping an uncommitted batch is the abort.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Aggregate counts for one repository, as reported by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryStats {
    pub id: String,
    pub files: u64,
    pub symbols: u64,
    pub last_indexed_ns: i64,
}

/// The relational/FTS store. One writer, many readers; every mutation goes
/// through `commit` so multi-table updates stay atomic.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Start accumulating mutations. Commit applies them atomically;
    /// dropping the batch aborts.
    fn begin_write(&self) -> WriteBatch {
        WriteBatch::default()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), EngineError>;

    async fn find_file(
        &self,
        repository_id: &str,
        relative_path: &str,
    ) -> Result<Option<SourceFile>, EngineError>;

    /// All live (non-tombstoned) files of a repository, for reconciliation.
    async fn list_files(&self, repository_id: &str) -> Result<Vec<SourceFile>, EngineError>;

    /// Tiered exact → case-insensitive → prefix lookup with deterministic
    /// tie-breaks (shorter path, then path, then line).
    async fn lookup_symbol(
        &self,
        repository_id: &str,
        name: &str,
        kind: Option<SymbolKind>,
        limit: usize,
    ) -> Result<Vec<Hit>, EngineError>;

    /// BM25-ranked search over one of the FTS document sets. The query is a
    /// best-effort bag of terms; unsupported operators are stripped.
    async fn search_fts(
        &self,
        repository_id: &str,
        query: &str,
        mode: FtsMode,
        limit: usize,
    ) -> Result<Vec<Hit>, EngineError>;

    /// The indexed text of one file (the `fts_code` document), used to
    /// build snippets for hits whose backend carries no text.
    async fn file_text(
        &self,
        repository_id: &str,
        relative_path: &str,
    ) -> Result<Option<String>, EngineError>;

    async fn has_repository(&self, repository_id: &str) -> Result<bool, EngineError>;

    async fn repository_stats(&self) -> Result<Vec<RepositoryStats>, EngineError>;

    /// Count of committed mutating transactions, for idempotence checks.
    async fn write_count(&self) -> u64;
}
