//! Plugin registry: owns one parser per language with a bounded-memory,
//! lazily-populated lifecycle. Parsers are instantiated on first use under
//! a load timeout, evicted LRU when the registry exceeds its memory budget,
//! and put on cooldown when instantiation fails or overruns.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::interfaces::Plugin;
use crate::domain::{EngineError, Language};

type PluginFactory = Arc<dyn Fn() -> Result<Box<dyn Plugin>, EngineError> + Send + Sync>;

/// Declaration of one plugin: how to route to it and how to build it.
#[derive(Clone)]
pub struct PluginSpec {
    language: Language,
    extensions: Vec<&'static str>,
    priority: i32,
    /// Rough resident cost of a loaded instance, for the memory budget.
    memory_cost: u64,
    factory: PluginFactory,
}

impl PluginSpec {
    pub fn new(
        language: Language,
        extensions: Vec<&'static str>,
        priority: i32,
        memory_cost: u64,
        factory: impl Fn() -> Result<Box<dyn Plugin>, EngineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            language,
            extensions,
            priority,
            memory_cost,
            factory: Arc::new(factory),
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn extensions(&self) -> &[&'static str] {
        &self.extensions
    }
}

/// Lifecycle state of one plugin, surfaced by `get_status`/`list_plugins`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PluginState {
    Loaded,
    Evicted,
    Unavailable { until_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PluginStatus {
    pub language: String,
    pub extensions: Vec<String>,
    #[serde(flatten)]
    pub state: PluginState,
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    memory_cost: u64,
    last_used: u64,
}

#[derive(Default)]
struct RegistryInner {
    loaded: HashMap<Language, LoadedPlugin>,
    cooldowns: HashMap<Language, Instant>,
    resident: u64,
    use_tick: u64,
}

pub struct PluginRegistry {
    specs: Vec<PluginSpec>,
    /// extension (lowercase, may be multi-dot like "d.ts") → spec index
    by_extension: HashMap<String, usize>,
    inner: Mutex<RegistryInner>,
    memory_budget: u64,
    load_timeout: Duration,
    cooldown: Duration,
    instantiations: AtomicU64,
}

impl PluginRegistry {
    pub fn new(
        specs: Vec<PluginSpec>,
        memory_budget: u64,
        load_timeout: Duration,
        cooldown: Duration,
    ) -> Self {
        let mut by_extension: HashMap<String, usize> = HashMap::new();
        for (index, spec) in specs.iter().enumerate() {
            for ext in &spec.extensions {
                let key = ext.to_lowercase();
                match by_extension.get(&key) {
                    Some(&existing) if specs[existing].priority >= spec.priority => {}
                    _ => {
                        by_extension.insert(key, index);
                    }
                }
            }
        }
        Self {
            specs,
            by_extension,
            inner: Mutex::new(RegistryInner::default()),
            memory_budget,
            load_timeout,
            cooldown,
            instantiations: AtomicU64::new(0),
        }
    }

    /// Route a relative path to its plugin spec. The most specific matching
    /// extension wins (`d.ts` beats `ts`), then declared priority.
    fn spec_for(&self, relative_path: &str) -> Option<&PluginSpec> {
        let file_name = relative_path.rsplit('/').next()?.to_lowercase();
        let mut best: Option<(&str, usize)> = None;
        for (ext, &index) in &self.by_extension {
            let suffix = format!(".{}", ext);
            if file_name.ends_with(&suffix) {
                match best {
                    Some((best_ext, _)) if best_ext.len() >= ext.len() => {}
                    _ => best = Some((ext.as_str(), index)),
                }
            }
        }
        best.map(|(_, index)| &self.specs[index])
    }

    /// Language tag a path would be indexed under, without loading anything.
    pub fn language_for(&self, relative_path: &str) -> Language {
        self.spec_for(relative_path)
            .map(|spec| spec.language)
            .unwrap_or(Language::Unknown)
    }

    /// Fetch (lazily instantiating) the plugin for a path. `None` means no
    /// dedicated plugin is usable right now and the caller should fall back
    /// to the generic extractor.
    pub async fn acquire(&self, relative_path: &str) -> Option<Arc<dyn Plugin>> {
        let spec = self.spec_for(relative_path)?.clone();
        let language = spec.language;

        {
            let mut inner = self.inner.lock().await;
            if let Some(until) = inner.cooldowns.get(&language) {
                if *until > Instant::now() {
                    return None;
                }
                inner.cooldowns.remove(&language);
            }
            if inner.loaded.contains_key(&language) {
                inner.use_tick += 1;
                let tick = inner.use_tick;
                if let Some(loaded) = inner.loaded.get_mut(&language) {
                    loaded.last_used = tick;
                    return Some(loaded.plugin.clone());
                }
            }
        }

        // Instantiate outside the lock; only insertion re-enters it.
        match self.instantiate(&spec).await {
            Ok(plugin) => {
                let plugin: Arc<dyn Plugin> = Arc::from(plugin);
                let mut inner = self.inner.lock().await;
                inner.use_tick += 1;
                let tick = inner.use_tick;
                // A concurrent acquire may have won the load race; keep the
                // instance already in the map so the budget stays honest.
                if let Some(existing) = inner.loaded.get_mut(&language) {
                    existing.last_used = tick;
                    return Some(existing.plugin.clone());
                }
                inner.resident += spec.memory_cost;
                inner.loaded.insert(
                    language,
                    LoadedPlugin {
                        plugin: plugin.clone(),
                        memory_cost: spec.memory_cost,
                        last_used: tick,
                    },
                );
                Self::evict_over_budget(&mut inner, self.memory_budget, language);
                Some(plugin)
            }
            Err(e) => {
                warn!(
                    "Plugin for {} unavailable for {:?}: {}",
                    language, self.cooldown, e
                );
                let mut inner = self.inner.lock().await;
                inner
                    .cooldowns
                    .insert(language, Instant::now() + self.cooldown);
                None
            }
        }
    }

    async fn instantiate(&self, spec: &PluginSpec) -> Result<Box<dyn Plugin>, EngineError> {
        self.instantiations.fetch_add(1, Ordering::Relaxed);
        let factory = spec.factory.clone();
        let language = spec.language;
        debug!("Instantiating plugin for {}", language);

        let build = tokio::task::spawn_blocking(move || {
            catch_unwind(AssertUnwindSafe(|| factory()))
                .map_err(|_| EngineError::parse(format!("plugin for {} panicked on load", language)))?
        });

        match tokio::time::timeout(self.load_timeout, build).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(EngineError::internal(format!(
                "plugin load task failed: {}",
                join
            ))),
            Err(_) => Err(EngineError::timeout(format!(
                "plugin for {} exceeded load timeout",
                language
            ))),
        }
    }

    /// Drop least-recently-used plugins until the resident estimate fits the
    /// budget. The plugin just inserted is never the eviction victim.
    fn evict_over_budget(inner: &mut RegistryInner, budget: u64, keep: Language) {
        while inner.resident > budget && inner.loaded.len() > 1 {
            let victim = inner
                .loaded
                .iter()
                .filter(|(lang, _)| **lang != keep)
                .min_by_key(|(_, loaded)| loaded.last_used)
                .map(|(lang, _)| *lang);
            match victim {
                Some(lang) => {
                    if let Some(evicted) = inner.loaded.remove(&lang) {
                        inner.resident = inner.resident.saturating_sub(evicted.memory_cost);
                        debug!("Evicted plugin for {} (LRU, over budget)", lang);
                    }
                }
                None => break,
            }
        }
    }

    /// How many plugin instantiations have happened since startup. The BM25
    /// fast path asserts this stays flat across queries.
    pub fn instantiation_count(&self) -> u64 {
        self.instantiations.load(Ordering::Relaxed)
    }

    pub async fn states(&self) -> Vec<PluginStatus> {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        self.specs
            .iter()
            .map(|spec| {
                let state = if inner.loaded.contains_key(&spec.language) {
                    PluginState::Loaded
                } else if let Some(until) = inner.cooldowns.get(&spec.language) {
                    if *until > now {
                        PluginState::Unavailable {
                            until_ms: until.duration_since(now).as_millis() as u64,
                        }
                    } else {
                        PluginState::Evicted
                    }
                } else {
                    PluginState::Evicted
                };
                PluginStatus {
                    language: spec.language.as_str().to_string(),
                    extensions: spec.extensions.iter().map(|e| e.to_string()).collect(),
                    state,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::interfaces::ParseResult;

    struct NoopPlugin(Language);

    impl Plugin for NoopPlugin {
        fn language_tag(&self) -> &str {
            self.0.as_str()
        }

        fn supports(&self, _relative_path: &str) -> bool {
            true
        }

        fn parse(&self, _bytes: &[u8], _path: &str) -> Result<ParseResult, EngineError> {
            Ok(ParseResult::default())
        }
    }

    fn spec(language: Language, exts: Vec<&'static str>, priority: i32, cost: u64) -> PluginSpec {
        PluginSpec::new(language, exts, priority, cost, move || {
            Ok(Box::new(NoopPlugin(language)) as Box<dyn Plugin>)
        })
    }

    fn registry(specs: Vec<PluginSpec>, budget: u64) -> PluginRegistry {
        PluginRegistry::new(
            specs,
            budget,
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_lazy_instantiation_and_reuse() {
        let registry = registry(vec![spec(Language::Rust, vec!["rs"], 0, 10)], 1000);
        assert_eq!(registry.instantiation_count(), 0);

        let first = registry.acquire("src/lib.rs").await;
        assert!(first.is_some());
        assert_eq!(registry.instantiation_count(), 1);

        let second = registry.acquire("src/main.rs").await;
        assert!(second.is_some());
        assert_eq!(registry.instantiation_count(), 1, "reuse, no reload");
    }

    #[tokio::test]
    async fn test_specific_extension_wins() {
        let registry = registry(
            vec![
                spec(Language::TypeScript, vec!["ts"], 0, 10),
                spec(Language::JavaScript, vec!["d.ts"], 0, 10),
            ],
            1000,
        );
        assert_eq!(registry.language_for("types.d.ts"), Language::JavaScript);
        assert_eq!(registry.language_for("app.ts"), Language::TypeScript);
    }

    #[tokio::test]
    async fn test_priority_breaks_extension_conflicts() {
        let registry = registry(
            vec![
                spec(Language::Python, vec!["x"], 1, 10),
                spec(Language::Go, vec!["x"], 5, 10),
            ],
            1000,
        );
        assert_eq!(registry.language_for("file.x"), Language::Go);
    }

    #[tokio::test]
    async fn test_lru_eviction_over_budget() {
        let registry = registry(
            vec![
                spec(Language::Rust, vec!["rs"], 0, 60),
                spec(Language::Python, vec!["py"], 0, 60),
            ],
            100,
        );
        registry.acquire("a.rs").await.unwrap();
        registry.acquire("b.py").await.unwrap();

        // Budget 100 < 120 resident: the older plugin was evicted.
        let states = registry.states().await;
        let rust = states.iter().find(|s| s.language == "rust").unwrap();
        let python = states.iter().find(|s| s.language == "python").unwrap();
        assert_eq!(rust.state, PluginState::Evicted);
        assert_eq!(python.state, PluginState::Loaded);

        // An evicted plugin is recreated on next demand.
        registry.acquire("c.rs").await.unwrap();
        assert_eq!(registry.instantiation_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_factory_enters_cooldown() {
        let failing = PluginSpec::new(Language::Go, vec!["go"], 0, 10, || {
            Err(EngineError::parse("no grammar"))
        });
        let registry = registry(vec![failing], 1000);

        assert!(registry.acquire("main.go").await.is_none());
        let states = registry.states().await;
        assert!(matches!(
            states[0].state,
            PluginState::Unavailable { .. }
        ));

        // Still in cooldown: no second instantiation attempt.
        assert!(registry.acquire("main.go").await.is_none());
        assert_eq!(registry.instantiation_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_extension_has_no_plugin() {
        let registry = registry(vec![spec(Language::Rust, vec!["rs"], 0, 10)], 1000);
        assert!(registry.acquire("notes.txt").await.is_none());
        assert_eq!(registry.language_for("notes.txt"), Language::Unknown);
        assert_eq!(registry.instantiation_count(), 0);
    }
}
