//! Shared test environment: a temp repository indexed into an in-memory
//! store, with the deterministic mock embedding provider and an in-memory
//! vector store unless a test injects its own.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use codeintel::application::interfaces::{
    EmbeddingProvider, IndexStore, Plugin, VectorStore,
};
use codeintel::{
    default_plugin_specs, Dispatcher, EmbeddingPipeline, EngineConfig, FallbackPlugin,
    IndexingEngine, MemoryVectorStore, MockEmbedding, PluginRegistry, Repository, SqliteStorage,
    Tools,
};

pub const COLLECTION: &str = "code_chunks";

pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub repo: Repository,
    pub store: Arc<dyn IndexStore>,
    pub registry: Arc<PluginRegistry>,
    pub provider: Arc<MockEmbedding>,
    pub pipeline: Arc<EmbeddingPipeline>,
    pub engine: Arc<IndexingEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub tools: Tools,
}

pub async fn env() -> TestEnv {
    env_with(Arc::new(MemoryVectorStore::new()), EngineConfig::default()).await
}

pub async fn env_with(vector: Arc<dyn VectorStore>, config: EngineConfig) -> TestEnv {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let repo = Repository::open(dir.path()).expect("Failed to open repository");

    let store: Arc<dyn IndexStore> =
        Arc::new(SqliteStorage::in_memory().expect("Failed to create store"));
    let registry = Arc::new(PluginRegistry::new(
        default_plugin_specs(),
        config.plugin_memory_budget,
        config.plugin_load_timeout,
        config.plugin_cooldown,
    ));
    let fallback: Arc<dyn Plugin> = Arc::new(FallbackPlugin::new());

    let provider = Arc::new(MockEmbedding::new());
    let pipeline = Arc::new(EmbeddingPipeline::new(
        provider.clone() as Arc<dyn EmbeddingProvider>,
        vector,
        COLLECTION,
        &config,
    ));
    // A pre-existing collection bound to another model is a legitimate
    // fixture; queries surface the mismatch.
    let _ = pipeline.ensure_ready().await;

    let engine = Arc::new(IndexingEngine::new(
        store.clone(),
        registry.clone(),
        fallback,
        Some(pipeline.clone()),
        config.clone(),
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(store.clone(), config.clone()).with_embedder(pipeline.clone()),
    );
    let tools = Tools::new(
        repo.clone(),
        dispatcher.clone(),
        engine.clone(),
        registry.clone(),
        store.clone(),
    );

    TestEnv {
        dir,
        repo,
        store,
        registry,
        provider,
        pipeline,
        engine,
        dispatcher,
        tools,
    }
}

pub fn write_file(env: &TestEnv, relative_path: &str, content: &str) {
    let path = env.dir.path().join(relative_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
    }
    std::fs::write(path, content).expect("Failed to write file");
}

pub fn remove_file(env: &TestEnv, relative_path: &str) {
    std::fs::remove_file(env.dir.path().join(relative_path)).expect("Failed to remove file");
}

pub fn move_file(env: &TestEnv, from: &str, to: &str) {
    let target = env.dir.path().join(to);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
    }
    std::fs::rename(env.dir.path().join(from), target).expect("Failed to move file");
}

/// The S1 fixture: a parser class at line 10 and a method at line 12.
pub fn parser_fixture() -> String {
    let mut content = String::new();
    for i in 1..10 {
        content.push_str(&format!("# padding line {}\n", i));
    }
    content.push_str("class Parser:\n");
    content.push_str("    \"\"\"Parses things.\"\"\"\n");
    content.push_str("    def parse(self):\n");
    content.push_str("        return None\n");
    content
}

pub fn exists_on_disk(env: &TestEnv, relative_path: &str) -> bool {
    env.dir.path().join(relative_path).exists()
}

pub fn abs(env: &TestEnv, relative_path: &str) -> std::path::PathBuf {
    env.dir.path().join(relative_path)
}

pub fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}
