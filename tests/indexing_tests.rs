//! End-to-end indexing behavior: fresh index + lookup, change detection,
//! reconciliation, fallback on broken parsers, and the move optimization.

mod common;

use codeintel::application::interfaces::{ParseResult, Plugin, PointFilter};
use codeintel::{
    EngineConfig, FileOutcome, HitSource, IndexOptions, Language, MemoryVectorStore,
    PluginRegistry, PluginSpec, SymbolKind,
};
use common::*;
use std::sync::Arc;

#[tokio::test]
async fn test_fresh_index_and_exact_symbol_lookup() {
    let env = env().await;
    write_file(&env, "src/parser.py", &parser_fixture());

    let report = env.tools.reindex(None, false).await.unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.errored, 0);

    let outcome = env.tools.symbol_lookup("Parser", None).await.unwrap();
    assert!(!outcome.partial);
    assert_eq!(outcome.hits.len(), 1);

    let hit = &outcome.hits[0];
    assert_eq!(hit.relative_path, "src/parser.py");
    assert_eq!(hit.kind, Some(SymbolKind::Class));
    assert_eq!(hit.line, 10);
}

#[tokio::test]
async fn test_case_insensitive_lookup_stays_on_symbol_table() {
    let env = env().await;
    write_file(&env, "src/parser.py", &parser_fixture());
    env.tools.reindex(None, false).await.unwrap();

    let outcome = env.tools.symbol_lookup("parser", None).await.unwrap();
    assert_eq!(outcome.hits.len(), 1);
    let hit = &outcome.hits[0];
    assert_eq!(hit.kind, Some(SymbolKind::Class));
    // Exact-case miss fell through to case-insensitive, not to FTS.
    assert_eq!(hit.source, HitSource::Symbol);
}

#[tokio::test]
async fn test_reindex_of_unchanged_content_writes_nothing() {
    let env = env().await;
    write_file(&env, "src/lib.rs", "pub fn alpha() {}\npub fn beta() {}\n");
    write_file(&env, "src/other.rs", "pub fn gamma() {}\n");

    let report = env.tools.reindex(None, false).await.unwrap();
    assert_eq!(report.indexed, 2);

    let writes_after_first = env.store.write_count().await;
    let report = env.tools.reindex(None, false).await.unwrap();
    assert_eq!(report.indexed, 0);
    assert_eq!(report.unchanged, 2);
    assert_eq!(
        env.store.write_count().await,
        writes_after_first,
        "second pass over identical content must not write"
    );
}

#[tokio::test]
async fn test_touched_mtime_with_same_bytes_skips_parsing() {
    let env = env().await;
    write_file(&env, "src/lib.rs", "pub fn alpha() {}\n");
    env.tools.reindex(None, false).await.unwrap();

    // Rewrite identical bytes: stat changes, content hash does not.
    write_file(&env, "src/lib.rs", "pub fn alpha() {}\n");
    let outcome = env
        .engine
        .index_file(&env.repo, &abs(&env, "src/lib.rs"), false)
        .await;
    assert_eq!(outcome, FileOutcome::Unchanged);
}

#[tokio::test]
async fn test_force_reindexes_everything() {
    let env = env().await;
    write_file(&env, "src/lib.rs", "pub fn alpha() {}\n");
    env.tools.reindex(None, false).await.unwrap();

    let report = env.tools.reindex(None, true).await.unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.unchanged, 0);
}

#[tokio::test]
async fn test_reconciliation_removes_vanished_files() {
    let env = env().await;
    write_file(&env, "src/keep.rs", "pub fn keep() {}\n");
    write_file(&env, "src/gone.rs", "pub fn gone() {}\n");
    env.tools.reindex(None, false).await.unwrap();

    remove_file(&env, "src/gone.rs");
    env.tools.reindex(None, false).await.unwrap();

    let outcome = env.tools.symbol_lookup("gone", None).await.unwrap();
    assert!(outcome.hits.is_empty());
    let files = env.store.list_files(env.repo.id()).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].relative_path(), "src/keep.rs");
}

#[tokio::test]
async fn test_oversize_file_is_skipped() {
    let mut config = EngineConfig::default();
    config.max_file_size = 64;
    let env = env_with(Arc::new(MemoryVectorStore::new()), config).await;

    write_file(&env, "big.py", &"x = 1\n".repeat(100));
    write_file(&env, "small.py", "y = 2\n");

    let report = env.tools.reindex(None, false).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.indexed, 1);
}

#[tokio::test]
async fn test_ignore_file_is_honored() {
    let env = env().await;
    write_file(&env, ".codeintelignore", "generated/\n");
    write_file(&env, "generated/out.py", "def generated(): ...\n");
    write_file(&env, "src/real.py", "def real(): ...\n");

    env.tools.reindex(None, false).await.unwrap();

    assert!(env
        .tools
        .symbol_lookup("generated", None)
        .await
        .unwrap()
        .hits
        .is_empty());
    assert_eq!(
        env.tools.symbol_lookup("real", None).await.unwrap().hits.len(),
        1
    );
}

struct PanickingPlugin;

impl Plugin for PanickingPlugin {
    fn language_tag(&self) -> &str {
        "xyz"
    }

    fn supports(&self, relative_path: &str) -> bool {
        relative_path.ends_with(".xyz")
    }

    fn parse(&self, _bytes: &[u8], _relative_path: &str) -> Result<ParseResult, codeintel::EngineError> {
        panic!("this parser always explodes");
    }
}

#[tokio::test]
async fn test_broken_parser_demotes_to_generic_fallback() {
    let config = EngineConfig::default();
    let env = env_with(Arc::new(MemoryVectorStore::new()), config.clone()).await;

    // Rebuild the engine with an extra plugin that panics on every input.
    let mut specs = codeintel::default_plugin_specs();
    specs.push(PluginSpec::new(
        Language::Go, // any registered tag will do for a test grammar
        vec!["xyz"],
        10,
        1024,
        || Ok(Box::new(PanickingPlugin) as Box<dyn Plugin>),
    ));
    let registry = Arc::new(PluginRegistry::new(
        specs,
        config.plugin_memory_budget,
        config.plugin_load_timeout,
        config.plugin_cooldown,
    ));
    let engine = codeintel::IndexingEngine::new(
        env.store.clone(),
        registry,
        Arc::new(codeintel::FallbackPlugin::new()),
        None,
        config,
    );

    write_file(&env, "a.xyz", "hello from a strange language\n");
    let mut batch = env.store.begin_write();
    batch.push(codeintel::WriteOp::UpsertRepository(env.repo.clone()));
    env.store.commit(batch).await.unwrap();

    let report = engine
        .index_repository(&env.repo, &IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(report.errored, 1);
    assert_eq!(report.errors[0].path, "a.xyz");

    // The generic tokenizer still populated fts_code.
    let outcome = env.tools.search_code("hello", false, None, None, None).await.unwrap();
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].relative_path, "a.xyz");

    // And the error is recorded on the file row.
    let file = env.store.find_file(env.repo.id(), "a.xyz").await.unwrap().unwrap();
    assert!(file.index_error().is_some());
}

#[tokio::test]
async fn test_rename_preserves_embeddings() {
    let env = env().await;
    write_file(&env, "src/parser.py", &parser_fixture());
    env.tools.reindex(None, false).await.unwrap();

    let calls_after_index = env.provider.call_count();
    assert!(calls_after_index > 0, "indexing embedded something");

    // Content-unchanged move: storage rename plus vector payload update.
    move_file(&env, "src/parser.py", "src/lex/parser.py");
    env.engine
        .rename(&env.repo, "src/parser.py", "src/lex/parser.py")
        .await
        .unwrap();

    assert_eq!(
        env.provider.call_count(),
        calls_after_index,
        "a pure rename must not call the embedding provider"
    );

    let outcome = env
        .tools
        .search_code("Parser", true, None, None, None)
        .await
        .unwrap();
    assert!(!outcome.degraded);
    assert!(outcome
        .hits
        .iter()
        .any(|h| h.relative_path == "src/lex/parser.py"));
    assert!(outcome
        .hits
        .iter()
        .all(|h| h.relative_path != "src/parser.py"));

    // The vector store has no points left under the old path.
    let stale = env
        .pipeline
        .vector_store()
        .fetch(COLLECTION, &PointFilter::by_path("src/parser.py"))
        .await
        .unwrap();
    assert!(stale.is_empty());
}

#[tokio::test]
async fn test_reembedding_skips_unchanged_chunks() {
    let env = env().await;
    write_file(&env, "src/lib.rs", "pub fn alpha() {}\n");
    env.tools.reindex(None, false).await.unwrap();

    let calls_after_index = env.provider.call_count();
    let report = env.tools.reindex(None, true).await.unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(
        env.provider.call_count(),
        calls_after_index,
        "forced reindex of identical content reuses stored vectors"
    );
}

#[tokio::test]
async fn test_soft_delete_then_hard_delete() {
    let env = env().await;
    write_file(&env, "src/temp.py", "def temp(): ...\n");
    env.tools.reindex(None, false).await.unwrap();

    let hash = env
        .engine
        .soft_delete(&env.repo, "src/temp.py")
        .await
        .unwrap();
    assert!(hash.is_some());
    assert!(env
        .tools
        .symbol_lookup("temp", None)
        .await
        .unwrap()
        .hits
        .is_empty());

    env.engine.hard_delete(&env.repo, "src/temp.py").await.unwrap();
    assert!(env
        .store
        .find_file(env.repo.id(), "src/temp.py")
        .await
        .unwrap()
        .is_none());
    let points = env
        .pipeline
        .vector_store()
        .fetch(COLLECTION, &PointFilter::by_path("src/temp.py"))
        .await
        .unwrap();
    assert!(points.is_empty());
}

#[tokio::test]
async fn test_scoped_reindex_only_touches_requested_paths() {
    let env = env().await;
    write_file(&env, "src/a.py", "def alpha(): ...\n");
    write_file(&env, "src/b.py", "def beta(): ...\n");

    let report = env.tools.reindex(Some("src/a.py"), false).await.unwrap();
    assert_eq!(report.total(), 1);
    assert_eq!(
        env.tools.symbol_lookup("alpha", None).await.unwrap().hits.len(),
        1
    );
    assert!(env
        .tools
        .symbol_lookup("beta", None)
        .await
        .unwrap()
        .hits
        .is_empty());
}
