//! SQLite-backed index store: relational tables for repositories, files and
//! symbols plus two FTS5 document sets for BM25 search. Single writer behind
//! a mutex; every mutation batch commits in one transaction so files,
//! symbols and FTS rows never diverge.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::interfaces::{
    FtsMode, IndexStore, RepositoryStats, WriteBatch, WriteOp,
};
use crate::application::query::{parse_query, ParsedQuery};
use crate::application::snippet;
use crate::domain::{EngineError, Hit, HitSource, Language, SourceFile, SymbolKind};

/// Version written to the `meta` table. Opening a store written by a newer
/// build refuses before any write is attempted.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    writes: AtomicU64,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::storage(format!("Failed to open database: {}", e)))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            EngineError::storage(format!("Failed to create in-memory database: {}", e))
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, EngineError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| EngineError::storage(format!("Failed to enable foreign keys: {}", e)))?;

        check_schema_version(&conn)?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            writes: AtomicU64::new(0),
        })
    }
}

fn check_schema_version(conn: &Connection) -> Result<(), EngineError> {
    let has_meta: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| EngineError::storage(format!("Failed to inspect store: {}", e)))?;
    if has_meta == 0 {
        return Ok(());
    }

    let found: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| EngineError::storage(format!("Failed to read schema version: {}", e)))?;

    if let Some(found) = found {
        let found: u32 = found
            .parse()
            .map_err(|_| EngineError::storage(format!("Corrupt schema version: {}", found)))?;
        if found > SCHEMA_VERSION {
            return Err(EngineError::SchemaMismatch {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        // Forward migrations (found < SCHEMA_VERSION) run here inside one
        // transaction once version 2 exists.
    }
    Ok(())
}

fn initialize_schema(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS repositories (
            id TEXT PRIMARY KEY,
            created_ns INTEGER NOT NULL,
            last_indexed_ns INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
            relative_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            language TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime_ns INTEGER NOT NULL,
            index_error TEXT,
            last_indexed_ns INTEGER NOT NULL DEFAULT 0,
            deleted_ns INTEGER,
            UNIQUE (repository_id, relative_path)
        );
        CREATE INDEX IF NOT EXISTS idx_files_repository ON files(repository_id);

        CREATE TABLE IF NOT EXISTS symbols (
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            signature TEXT,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            start_col INTEGER NOT NULL DEFAULT 0,
            end_col INTEGER NOT NULL DEFAULT 0,
            parent_name TEXT,
            PRIMARY KEY (file_id, name, kind, start_line)
        );
        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
        CREATE INDEX IF NOT EXISTS idx_symbols_name_nocase ON symbols(name COLLATE NOCASE);

        CREATE VIRTUAL TABLE IF NOT EXISTS fts_code USING fts5(
            body,
            repository_id UNINDEXED,
            relative_path UNINDEXED,
            tokenize = 'unicode61 tokenchars ''_'''
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS fts_symbol USING fts5(
            body,
            repository_id UNINDEXED,
            relative_path UNINDEXED,
            tokenize = 'unicode61 tokenchars ''_'''
        );
        "#,
    )
    .map_err(|e| EngineError::storage(format!("Failed to initialize schema: {}", e)))?;

    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )
    .map_err(|e| EngineError::storage(format!("Failed to record schema version: {}", e)))?;

    debug!("Store schema ready (version {})", SCHEMA_VERSION);
    Ok(())
}

/// Translate a parsed bag-of-terms query into an FTS5 MATCH expression.
/// Positive terms OR together (BM25 ranks); negations chain as NOT. A query
/// with no positive terms has nothing to rank and returns `None`.
fn build_match_expr(parsed: &ParsedQuery) -> Option<String> {
    let mut positives: Vec<String> = Vec::new();
    for term in &parsed.terms {
        positives.push(quote_fts(term));
    }
    for phrase in &parsed.phrases {
        positives.push(quote_fts(phrase));
    }
    if positives.is_empty() {
        return None;
    }

    let mut expr = format!("({})", positives.join(" OR "));
    for negated in &parsed.negated {
        expr.push_str(" NOT ");
        expr.push_str(&quote_fts(negated));
    }
    Some(expr)
}

fn quote_fts(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn file_id(
    tx: &Transaction<'_>,
    repository_id: &str,
    relative_path: &str,
) -> Result<Option<i64>, EngineError> {
    tx.query_row(
        "SELECT id FROM files WHERE repository_id = ?1 AND relative_path = ?2",
        params![repository_id, relative_path],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| EngineError::storage(format!("Failed to look up file id: {}", e)))
}

fn delete_file_rows(
    tx: &Transaction<'_>,
    repository_id: &str,
    relative_path: &str,
) -> Result<bool, EngineError> {
    let Some(id) = file_id(tx, repository_id, relative_path)? else {
        return Ok(false);
    };
    tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![id])
        .map_err(|e| EngineError::storage(format!("Failed to delete symbols: {}", e)))?;
    tx.execute("DELETE FROM fts_code WHERE rowid = ?1", params![id])
        .map_err(|e| EngineError::storage(format!("Failed to delete fts_code row: {}", e)))?;
    tx.execute("DELETE FROM fts_symbol WHERE rowid = ?1", params![id])
        .map_err(|e| EngineError::storage(format!("Failed to delete fts_symbol row: {}", e)))?;
    tx.execute("DELETE FROM files WHERE id = ?1", params![id])
        .map_err(|e| EngineError::storage(format!("Failed to delete file row: {}", e)))?;
    Ok(true)
}

fn apply_op(tx: &Transaction<'_>, op: &WriteOp) -> Result<(), EngineError> {
    match op {
        WriteOp::UpsertRepository(repository) => {
            // The local root never lands in the portable index; only the
            // stable id does.
            tx.execute(
                r#"INSERT INTO repositories (id, created_ns, last_indexed_ns)
                   VALUES (?1, ?2, 0)
                   ON CONFLICT(id) DO NOTHING"#,
                params![repository.id(), now_ns()],
            )
            .map_err(|e| EngineError::storage(format!("Failed to upsert repository: {}", e)))?;
        }

        WriteOp::UpsertFile {
            file,
            symbols,
            code_text,
            symbol_text,
        } => {
            tx.execute(
                r#"INSERT INTO files
                   (repository_id, relative_path, content_hash, language, size, mtime_ns,
                    index_error, last_indexed_ns, deleted_ns)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)
                   ON CONFLICT(repository_id, relative_path) DO UPDATE SET
                     content_hash = excluded.content_hash,
                     language = excluded.language,
                     size = excluded.size,
                     mtime_ns = excluded.mtime_ns,
                     index_error = excluded.index_error,
                     last_indexed_ns = excluded.last_indexed_ns,
                     deleted_ns = NULL"#,
                params![
                    file.repository_id(),
                    file.relative_path(),
                    file.content_hash(),
                    file.language().as_str(),
                    file.size() as i64,
                    file.mtime_ns(),
                    file.index_error(),
                    file.last_indexed_ns(),
                ],
            )
            .map_err(|e| EngineError::storage(format!("Failed to upsert file: {}", e)))?;

            let id = file_id(tx, file.repository_id(), file.relative_path())?
                .ok_or_else(|| EngineError::storage("file row vanished inside transaction"))?;

            // Old symbols and FTS rows go in the same transaction that
            // brings in the new ones, so readers never see a mix.
            tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![id])
                .map_err(|e| EngineError::storage(format!("Failed to clear symbols: {}", e)))?;
            tx.execute("DELETE FROM fts_code WHERE rowid = ?1", params![id])
                .map_err(|e| EngineError::storage(format!("Failed to clear fts_code: {}", e)))?;
            tx.execute("DELETE FROM fts_symbol WHERE rowid = ?1", params![id])
                .map_err(|e| EngineError::storage(format!("Failed to clear fts_symbol: {}", e)))?;

            {
                let mut stmt = tx
                    .prepare(
                        r#"INSERT OR REPLACE INTO symbols
                           (file_id, name, kind, signature, start_line, end_line,
                            start_col, end_col, parent_name)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
                    )
                    .map_err(|e| {
                        EngineError::storage(format!("Failed to prepare symbol insert: {}", e))
                    })?;
                for symbol in symbols {
                    stmt.execute(params![
                        id,
                        symbol.name(),
                        symbol.kind().as_str(),
                        symbol.signature(),
                        symbol.start_line(),
                        symbol.end_line(),
                        symbol.start_col(),
                        symbol.end_col(),
                        symbol.parent_name(),
                    ])
                    .map_err(|e| {
                        EngineError::storage(format!("Failed to insert symbol: {}", e))
                    })?;
                }
            }

            tx.execute(
                "INSERT INTO fts_code (rowid, body, repository_id, relative_path) VALUES (?1, ?2, ?3, ?4)",
                params![id, code_text, file.repository_id(), file.relative_path()],
            )
            .map_err(|e| EngineError::storage(format!("Failed to insert fts_code: {}", e)))?;

            if !symbol_text.is_empty() {
                tx.execute(
                    "INSERT INTO fts_symbol (rowid, body, repository_id, relative_path) VALUES (?1, ?2, ?3, ?4)",
                    params![id, symbol_text, file.repository_id(), file.relative_path()],
                )
                .map_err(|e| EngineError::storage(format!("Failed to insert fts_symbol: {}", e)))?;
            }
        }

        WriteOp::UpdateFileStat {
            repository_id,
            relative_path,
            size,
            mtime_ns,
        } => {
            tx.execute(
                "UPDATE files SET size = ?1, mtime_ns = ?2 WHERE repository_id = ?3 AND relative_path = ?4",
                params![*size as i64, mtime_ns, repository_id, relative_path],
            )
            .map_err(|e| EngineError::storage(format!("Failed to update file stat: {}", e)))?;
        }

        WriteOp::SoftDeleteFile {
            repository_id,
            relative_path,
            deleted_ns,
        } => {
            tx.execute(
                "UPDATE files SET deleted_ns = ?1 WHERE repository_id = ?2 AND relative_path = ?3",
                params![deleted_ns, repository_id, relative_path],
            )
            .map_err(|e| EngineError::storage(format!("Failed to tombstone file: {}", e)))?;
        }

        WriteOp::DeleteFile {
            repository_id,
            relative_path,
        } => {
            delete_file_rows(tx, repository_id, relative_path)?;
        }

        WriteOp::RenameFile {
            repository_id,
            from,
            to,
        } => {
            // A live row already at the target loses to the rename.
            if from != to {
                delete_file_rows(tx, repository_id, to)?;
            }
            let Some(id) = file_id(tx, repository_id, from)? else {
                return Err(EngineError::not_found(format!("no file row for {}", from)));
            };
            tx.execute(
                "UPDATE files SET relative_path = ?1, deleted_ns = NULL WHERE id = ?2",
                params![to, id],
            )
            .map_err(|e| EngineError::storage(format!("Failed to rename file: {}", e)))?;

            for table in ["fts_code", "fts_symbol"] {
                let body: Option<String> = tx
                    .query_row(
                        &format!("SELECT body FROM {} WHERE rowid = ?1", table),
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| {
                        EngineError::storage(format!("Failed to read {} body: {}", table, e))
                    })?;
                if let Some(body) = body {
                    tx.execute(&format!("DELETE FROM {} WHERE rowid = ?1", table), params![id])
                        .map_err(|e| {
                            EngineError::storage(format!("Failed to clear {}: {}", table, e))
                        })?;
                    tx.execute(
                        &format!(
                            "INSERT INTO {} (rowid, body, repository_id, relative_path) VALUES (?1, ?2, ?3, ?4)",
                            table
                        ),
                        params![id, body, repository_id, to],
                    )
                    .map_err(|e| {
                        EngineError::storage(format!("Failed to reinsert {}: {}", table, e))
                    })?;
                }
            }
        }

        WriteOp::TouchRepository {
            repository_id,
            last_indexed_ns,
        } => {
            tx.execute(
                "UPDATE repositories SET last_indexed_ns = ?1 WHERE id = ?2",
                params![last_indexed_ns, repository_id],
            )
            .map_err(|e| EngineError::storage(format!("Failed to touch repository: {}", e)))?;
        }
    }
    Ok(())
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceFile> {
    Ok(SourceFile::reconstitute(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        Language::parse(row.get::<_, String>(3)?.as_str()),
        row.get::<_, i64>(4)? as u64,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

const FILE_COLUMNS: &str = "repository_id, relative_path, content_hash, language, size, mtime_ns, index_error, last_indexed_ns, deleted_ns";

#[async_trait]
impl IndexStore for SqliteStorage {
    async fn commit(&self, batch: WriteBatch) -> Result<(), EngineError> {
        let ops = batch.into_ops();
        if ops.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().await;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| EngineError::storage(format!("Failed to start transaction: {}", e)))?;
        for op in &ops {
            apply_op(&tx, op)?;
        }
        tx.commit()
            .map_err(|e| EngineError::storage(format!("Failed to commit transaction: {}", e)))?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn find_file(
        &self,
        repository_id: &str,
        relative_path: &str,
    ) -> Result<Option<SourceFile>, EngineError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {} FROM files WHERE repository_id = ?1 AND relative_path = ?2",
                FILE_COLUMNS
            ),
            params![repository_id, relative_path],
            row_to_file,
        )
        .optional()
        .map_err(|e| EngineError::storage(format!("Failed to query file: {}", e)))
    }

    async fn list_files(&self, repository_id: &str) -> Result<Vec<SourceFile>, EngineError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM files WHERE repository_id = ?1 AND deleted_ns IS NULL ORDER BY relative_path",
                FILE_COLUMNS
            ))
            .map_err(|e| EngineError::storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map(params![repository_id], row_to_file)
            .map_err(|e| EngineError::storage(format!("Failed to query files: {}", e)))?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row.map_err(|e| EngineError::storage(format!("Failed to read row: {}", e)))?);
        }
        Ok(files)
    }

    async fn lookup_symbol(
        &self,
        repository_id: &str,
        name: &str,
        kind: Option<SymbolKind>,
        limit: usize,
    ) -> Result<Vec<Hit>, EngineError> {
        let conn = self.conn.lock().await;
        let kind_str = kind.map(|k| k.as_str().to_string());
        let prefix_pattern = format!("{}%", escape_like(name));

        // Tier order: exact case-sensitive, exact case-insensitive, prefix.
        // Scores step down so merged views keep the precision ordering.
        let tiers: [(&str, &str, f32); 3] = [
            ("s.name = ?2", name, 1.0),
            ("s.name = ?2 COLLATE NOCASE", name, 0.75),
            ("s.name LIKE ?2 ESCAPE '\\'", prefix_pattern.as_str(), 0.5),
        ];

        for (clause, needle, score) in tiers {
            let sql = format!(
                r#"SELECT f.relative_path, s.name, s.kind, s.signature, s.start_line, s.end_line
                   FROM symbols s
                   JOIN files f ON f.id = s.file_id
                   WHERE f.repository_id = ?1 AND f.deleted_ns IS NULL
                     AND {}
                     AND (?3 IS NULL OR s.kind = ?3)
                   ORDER BY length(f.relative_path), f.relative_path, s.start_line
                   LIMIT ?4"#,
                clause
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| EngineError::storage(format!("Failed to prepare lookup: {}", e)))?;
            let rows = stmt
                .query_map(
                    params![repository_id, needle, kind_str.as_deref(), limit as i64],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, u32>(4)?,
                            row.get::<_, u32>(5)?,
                        ))
                    },
                )
                .map_err(|e| EngineError::storage(format!("Failed to run lookup: {}", e)))?;

            let mut hits = Vec::new();
            for row in rows {
                let (relative_path, sym_name, kind_text, signature, start_line, end_line) =
                    row.map_err(|e| EngineError::storage(format!("Failed to read row: {}", e)))?;
                let snippet_text = signature.clone().unwrap_or_else(|| sym_name.clone());
                let highlights = snippet::highlight_offsets(&snippet_text, &[sym_name.clone()]);
                hits.push(
                    Hit::new(
                        relative_path,
                        start_line,
                        end_line,
                        snippet_text,
                        score,
                        HitSource::Symbol,
                    )
                    .with_symbol(SymbolKind::parse(&kind_text), signature)
                    .with_highlights(highlights),
                );
            }
            if !hits.is_empty() {
                return Ok(hits);
            }
        }
        Ok(Vec::new())
    }

    async fn search_fts(
        &self,
        repository_id: &str,
        query: &str,
        mode: FtsMode,
        limit: usize,
    ) -> Result<Vec<Hit>, EngineError> {
        let parsed = parse_query(query);
        let Some(match_expr) = build_match_expr(&parsed) else {
            return Ok(Vec::new());
        };
        let tokens = parsed.positive_tokens();

        let (table, source) = match mode {
            FtsMode::Code => ("fts_code", HitSource::FtsCode),
            FtsMode::Symbol => ("fts_symbol", HitSource::FtsSymbol),
        };

        let conn = self.conn.lock().await;
        let sql = format!(
            r#"SELECT {table}.rowid, {table}.relative_path, {table}.body, bm25({table}) AS rank
               FROM {table}
               JOIN files f ON f.id = {table}.rowid
               WHERE {table} MATCH ?1 AND {table}.repository_id = ?2 AND f.deleted_ns IS NULL
               ORDER BY rank
               LIMIT ?3"#,
            table = table
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EngineError::storage(format!("Failed to prepare search: {}", e)))?;
        let rows = stmt
            .query_map(params![match_expr, repository_id, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })
            .map_err(|e| EngineError::storage(format!("Failed to run search: {}", e)))?;

        let mut matched: Vec<(i64, String, String, f64)> = Vec::new();
        for row in rows {
            matched.push(row.map_err(|e| EngineError::storage(format!("Failed to read row: {}", e)))?);
        }

        let mut hits = Vec::new();
        for (rowid, relative_path, body, rank) in matched {
            // bm25() is better-is-smaller (negative); flip it so callers
            // sort descending everywhere.
            let score = -rank as f32;
            let hit = match mode {
                FtsMode::Code => {
                    let span = snippet::build(&body, &tokens);
                    Hit::new(relative_path, span.line, span.end_line, span.snippet, score, source)
                        .with_highlights(span.highlights)
                }
                FtsMode::Symbol => {
                    match probe_symbol(&conn, rowid, &tokens)? {
                        Some((sym_name, kind_text, signature, start_line, end_line)) => {
                            let snippet_text =
                                signature.clone().unwrap_or_else(|| sym_name.clone());
                            let highlights =
                                snippet::highlight_offsets(&snippet_text, &[sym_name]);
                            Hit::new(
                                relative_path,
                                start_line,
                                end_line,
                                snippet_text,
                                score,
                                source,
                            )
                            .with_symbol(SymbolKind::parse(&kind_text), signature)
                            .with_highlights(highlights)
                        }
                        None => {
                            let span = snippet::build(&body, &tokens);
                            Hit::new(
                                relative_path,
                                span.line,
                                span.end_line,
                                span.snippet,
                                score,
                                source,
                            )
                            .with_highlights(span.highlights)
                        }
                    }
                }
            };
            hits.push(hit);
        }
        Ok(hits)
    }

    async fn file_text(
        &self,
        repository_id: &str,
        relative_path: &str,
    ) -> Result<Option<String>, EngineError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            r#"SELECT body FROM fts_code
               WHERE rowid = (SELECT id FROM files
                              WHERE repository_id = ?1 AND relative_path = ?2
                                AND deleted_ns IS NULL)"#,
            params![repository_id, relative_path],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| EngineError::storage(format!("Failed to read file text: {}", e)))
    }

    async fn has_repository(&self, repository_id: &str) -> Result<bool, EngineError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM repositories WHERE id = ?1",
                params![repository_id],
                |row| row.get(0),
            )
            .map_err(|e| EngineError::storage(format!("Failed to query repository: {}", e)))?;
        Ok(count > 0)
    }

    async fn repository_stats(&self) -> Result<Vec<RepositoryStats>, EngineError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                r#"SELECT r.id, r.last_indexed_ns,
                      (SELECT COUNT(*) FROM files f
                       WHERE f.repository_id = r.id AND f.deleted_ns IS NULL),
                      (SELECT COUNT(*) FROM symbols s
                       JOIN files f2 ON f2.id = s.file_id
                       WHERE f2.repository_id = r.id AND f2.deleted_ns IS NULL)
                   FROM repositories r
                   ORDER BY r.id"#,
            )
            .map_err(|e| EngineError::storage(format!("Failed to prepare stats: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RepositoryStats {
                    id: row.get(0)?,
                    last_indexed_ns: row.get(1)?,
                    files: row.get::<_, i64>(2)? as u64,
                    symbols: row.get::<_, i64>(3)? as u64,
                })
            })
            .map_err(|e| EngineError::storage(format!("Failed to query stats: {}", e)))?;

        let mut stats = Vec::new();
        for row in rows {
            stats.push(row.map_err(|e| EngineError::storage(format!("Failed to read row: {}", e)))?);
        }
        Ok(stats)
    }

    async fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Resolve the symbol a symbol-document match refers to: the first symbol
/// in the file whose name equals (or starts with) a query token.
fn probe_symbol(
    conn: &Connection,
    file_rowid: i64,
    tokens: &[String],
) -> Result<Option<(String, String, Option<String>, u32, u32)>, EngineError> {
    for token in tokens {
        let prefix = format!("{}%", escape_like(token));
        let contains = format!("%{}%", escape_like(token));
        let found = conn
            .query_row(
                r#"SELECT name, kind, signature, start_line, end_line
                   FROM symbols
                   WHERE file_id = ?1
                     AND (name = ?2 COLLATE NOCASE
                          OR name LIKE ?3 ESCAPE '\'
                          OR name LIKE ?4 ESCAPE '\')
                   ORDER BY start_line
                   LIMIT 1"#,
                params![file_rowid, token, prefix, contains],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| EngineError::storage(format!("Failed to probe symbols: {}", e)))?;
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Repository, Symbol};
    use std::path::PathBuf;

    fn repo() -> Repository {
        Repository::reconstitute("test/repo".to_string(), PathBuf::from("/tmp/repo"))
    }

    async fn store_with_file(
        relative_path: &str,
        code: &str,
        symbols: Vec<Symbol>,
    ) -> SqliteStorage {
        let store = SqliteStorage::in_memory().unwrap();
        let symbol_text = symbols
            .iter()
            .map(|s| s.fts_line())
            .collect::<Vec<_>>()
            .join("\n");

        let mut batch = store.begin_write();
        batch.push(WriteOp::UpsertRepository(repo()));
        batch.push(WriteOp::UpsertFile {
            file: SourceFile::new(
                "test/repo",
                relative_path,
                "hash-1",
                Language::Python,
                code.len() as u64,
                1,
            ),
            symbols,
            code_text: code.to_string(),
            symbol_text,
        });
        store.commit(batch).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_lookup_symbol_tiers() {
        let store = store_with_file(
            "src/parser.py",
            "class Parser:\n    def parse(self): ...\n",
            vec![
                Symbol::new("Parser", SymbolKind::Class, 1, 2).with_signature("class Parser"),
                Symbol::new("parse", SymbolKind::Method, 2, 2).with_parent("Parser"),
            ],
        )
        .await;

        // Exact case-sensitive wins with full score.
        let exact = store
            .lookup_symbol("test/repo", "Parser", None, 10)
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].kind, Some(SymbolKind::Class));
        assert!((exact[0].score - 1.0).abs() < f32::EPSILON);

        // Case-insensitive fallback still resolves through the symbol
        // table, not FTS.
        let ci = store
            .lookup_symbol("test/repo", "parser", None, 10)
            .await
            .unwrap();
        assert_eq!(ci.len(), 1);
        assert_eq!(ci[0].source, HitSource::Symbol);
        assert_eq!(ci[0].kind, Some(SymbolKind::Class));

        // Prefix match as the last tier.
        let prefix = store
            .lookup_symbol("test/repo", "par", None, 10)
            .await
            .unwrap();
        assert_eq!(prefix.len(), 2);

        // Kind filter applies inside every tier.
        let methods = store
            .lookup_symbol("test/repo", "parse", Some(SymbolKind::Method), 10)
            .await
            .unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].line, 2);
    }

    #[tokio::test]
    async fn test_lookup_tie_break_is_deterministic() {
        let store = SqliteStorage::in_memory().unwrap();
        let mut batch = store.begin_write();
        batch.push(WriteOp::UpsertRepository(repo()));
        for (path, line) in [("src/deep/nested/a.py", 5), ("src/b.py", 9), ("src/b2.py", 3)] {
            batch.push(WriteOp::UpsertFile {
                file: SourceFile::new("test/repo", path, "h", Language::Python, 10, 1),
                symbols: vec![Symbol::new("target", SymbolKind::Function, line, line)],
                code_text: "def target(): ...".to_string(),
                symbol_text: "target function".to_string(),
            });
        }
        store.commit(batch).await.unwrap();

        let hits = store
            .lookup_symbol("test/repo", "target", None, 10)
            .await
            .unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.relative_path.as_str()).collect();
        // Shorter path first, then lexicographic, then line.
        assert_eq!(paths, vec!["src/b.py", "src/b2.py", "src/deep/nested/a.py"]);
    }

    #[tokio::test]
    async fn test_fts_search_and_negation() {
        let store = store_with_file(
            "src/main.py",
            "def handle_request(req):\n    return dispatch(req)\n",
            vec![],
        )
        .await;

        let hits = store
            .search_fts("test/repo", "dispatch", FtsMode::Code, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, HitSource::FtsCode);
        assert_eq!(hits[0].line, 2);
        assert!(!hits[0].highlights.is_empty());

        let negated = store
            .search_fts("test/repo", "dispatch -handle_request", FtsMode::Code, 10)
            .await
            .unwrap();
        assert!(negated.is_empty());

        // Operators are stripped, not errors.
        let stripped = store
            .search_fts("test/repo", "dispatch AND (", FtsMode::Code, 10)
            .await
            .unwrap();
        assert_eq!(stripped.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_in_one_transaction() {
        let store = store_with_file(
            "src/gone.py",
            "def vanish(): ...",
            vec![Symbol::new("vanish", SymbolKind::Function, 1, 1)],
        )
        .await;

        let mut batch = store.begin_write();
        batch.push(WriteOp::DeleteFile {
            repository_id: "test/repo".to_string(),
            relative_path: "src/gone.py".to_string(),
        });
        store.commit(batch).await.unwrap();

        assert!(store
            .find_file("test/repo", "src/gone.py")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .lookup_symbol("test/repo", "vanish", None, 10)
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .search_fts("test/repo", "vanish", FtsMode::Code, 10)
            .await
            .unwrap()
            .is_empty());

        // No orphans behind the scenes either.
        let conn = store.conn.lock().await;
        let orphan_symbols: i64 = conn
            .query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))
            .unwrap();
        let orphan_fts: i64 = conn
            .query_row("SELECT COUNT(*) FROM fts_code", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphan_symbols, 0);
        assert_eq!(orphan_fts, 0);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_then_rename_revives() {
        let store = store_with_file(
            "src/old.py",
            "def keeper(): ...",
            vec![Symbol::new("keeper", SymbolKind::Function, 1, 1)],
        )
        .await;

        let mut batch = store.begin_write();
        batch.push(WriteOp::SoftDeleteFile {
            repository_id: "test/repo".to_string(),
            relative_path: "src/old.py".to_string(),
            deleted_ns: 42,
        });
        store.commit(batch).await.unwrap();

        assert!(store
            .lookup_symbol("test/repo", "keeper", None, 10)
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .search_fts("test/repo", "keeper", FtsMode::Code, 10)
            .await
            .unwrap()
            .is_empty());
        // The row itself survives, tombstoned.
        let stored = store.find_file("test/repo", "src/old.py").await.unwrap();
        assert!(stored.unwrap().is_tombstoned());

        let mut batch = store.begin_write();
        batch.push(WriteOp::RenameFile {
            repository_id: "test/repo".to_string(),
            from: "src/old.py".to_string(),
            to: "src/lex/new.py".to_string(),
        });
        store.commit(batch).await.unwrap();

        let hits = store
            .lookup_symbol("test/repo", "keeper", None, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relative_path, "src/lex/new.py");

        let fts = store
            .search_fts("test/repo", "keeper", FtsMode::Code, 10)
            .await
            .unwrap();
        assert_eq!(fts.len(), 1);
        assert_eq!(fts[0].relative_path, "src/lex/new.py");
    }

    #[tokio::test]
    async fn test_write_counter_and_empty_batches() {
        let store = SqliteStorage::in_memory().unwrap();
        assert_eq!(store.write_count().await, 0);

        store.commit(store.begin_write()).await.unwrap();
        assert_eq!(store.write_count().await, 0, "empty batch is not a write");

        let mut batch = store.begin_write();
        batch.push(WriteOp::UpsertRepository(repo()));
        store.commit(batch).await.unwrap();
        assert_eq!(store.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_schema_mismatch_refuses_newer_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("current.db");

        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
                 INSERT INTO meta VALUES ('schema_version', '999');",
            )
            .unwrap();
        }

        let err = SqliteStorage::open(&db_path).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SchemaMismatch {
                found: 999,
                supported: SCHEMA_VERSION
            }
        ));
    }

    #[tokio::test]
    async fn test_repository_stats() {
        let store = store_with_file(
            "src/a.py",
            "def one(): ...",
            vec![
                Symbol::new("one", SymbolKind::Function, 1, 1),
                Symbol::new("two", SymbolKind::Function, 1, 2),
            ],
        )
        .await;

        let stats = store.repository_stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].id, "test/repo");
        assert_eq!(stats[0].files, 1);
        assert_eq!(stats[0].symbols, 2);
    }

    #[tokio::test]
    async fn test_phrase_search() {
        let store = store_with_file(
            "src/a.py",
            "# a hash map implementation\nclass HashMap: ...\n",
            vec![],
        )
        .await;

        let hits = store
            .search_fts("test/repo", "\"hash map\"", FtsMode::Code, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let miss = store
            .search_fts("test/repo", "\"map hash\"", FtsMode::Code, 10)
            .await
            .unwrap();
        assert!(miss.is_empty());
    }
}
