use std::time::Duration;

/// Tunables for the whole engine. Defaults match a mid-size repository on a
/// developer machine; everything here is overridable at wiring time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Files larger than this are skipped with reason `too_large`.
    pub max_file_size: u64,
    /// Wall-clock bound for a single parse before demotion to the fallback.
    pub parse_timeout: Duration,
    /// Bound on plugin instantiation; overrun marks the plugin unavailable.
    pub plugin_load_timeout: Duration,
    /// How long a failed plugin stays unavailable before a retry.
    pub plugin_cooldown: Duration,
    /// Memory budget for loaded parsers; LRU eviction above it.
    pub plugin_memory_budget: u64,
    /// Parse/hash worker pool size.
    pub workers: usize,
    /// Quiet period before a create/modify event is acted on.
    pub debounce: Duration,
    /// How long a deleted file's rows wait for a matching create (move).
    pub tombstone_ttl: Duration,
    /// Watcher queue bound; oldest non-delete events drop beyond it.
    pub watch_queue_capacity: usize,
    /// Chunks per embedding provider call.
    pub embed_batch_size: usize,
    /// Content-hash cache entries.
    pub hash_cache_capacity: usize,
    /// Result limit when the caller does not pass one.
    pub default_limit: usize,
    /// Hard cap on any requested limit.
    pub max_limit: usize,
    /// Per-query deadline when the caller does not pass one.
    pub query_timeout: Duration,
    /// Extra time granted to cancelled sub-queries to wind down.
    pub cancellation_grace: Duration,
    /// Reciprocal Rank Fusion smoothing constant.
    pub rrf_k: f32,
    /// Fusion weight of the BM25 leg.
    pub bm25_weight: f32,
    /// Fusion weight of the vector leg.
    pub vector_weight: f32,
    /// Budget granted to a hybrid reranker's primary strategy.
    pub rerank_budget: Duration,
    /// Exponential backoff base for embedding provider retries.
    pub embed_backoff_base: Duration,
    /// Embedding provider attempts before a chunk is parked as pending.
    pub embed_attempts: u32,
    /// Interval of the background sweep that retries pending chunks.
    pub embed_sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            parse_timeout: Duration::from_secs(30),
            plugin_load_timeout: Duration::from_secs(5),
            plugin_cooldown: Duration::from_secs(60),
            plugin_memory_budget: 1024 * 1024 * 1024,
            workers: num_cpus::get(),
            debounce: Duration::from_millis(500),
            tombstone_ttl: Duration::from_secs(60),
            watch_queue_capacity: 4096,
            embed_batch_size: 64,
            hash_cache_capacity: 8192,
            default_limit: 20,
            max_limit: 200,
            query_timeout: Duration::from_secs(5),
            cancellation_grace: Duration::from_millis(500),
            rrf_k: 60.0,
            bm25_weight: 0.4,
            vector_weight: 0.6,
            rerank_budget: Duration::from_millis(250),
            embed_backoff_base: Duration::from_millis(500),
            embed_attempts: 3,
            embed_sweep_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_limit(None), 20);
        assert_eq!(config.clamp_limit(Some(0)), 1);
        assert_eq!(config.clamp_limit(Some(50)), 50);
        assert_eq!(config.clamp_limit(Some(10_000)), 200);
    }
}
