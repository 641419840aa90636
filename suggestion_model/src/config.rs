use std::time::Duration;

/// Tunables governing fan-out, timeouts, caching and ranking, with the
/// defaults from spec §6. Threaded through every crate that needs one of
/// these numbers rather than each crate hardcoding its own constant.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionConfig {
    pub num_promoted_sources: usize,
    pub max_results_to_display: usize,
    pub max_results_per_source: usize,
    pub web_results_override_limit: usize,
    pub promoted_source_deadline: Duration,
    pub source_timeout: Duration,
    pub prefill: Duration,
    pub max_stat_age: Duration,
    pub max_source_event_age: Duration,
    pub min_impressions_for_source_ranking: u32,
    pub min_clicks_for_source_ranking: u32,
    pub max_shortcuts_returned: usize,
    pub query_thread_core_pool: usize,
    pub query_thread_max_pool: usize,
    pub shortcut_refresh_core_pool: usize,
    pub thread_keepalive: Duration,
    pub per_source_concurrent_query_limit: usize,
    pub cursor_notify_window: Duration,
    /// Capacity of `SessionCache`'s per-query results memo. The spec calls
    /// this cache "optional and soft-referenced (may be evicted)"; Rust has
    /// no GC-visible weak-value map, so a bounded LRU stands in for it.
    pub results_cache_capacity: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            num_promoted_sources: 4,
            max_results_to_display: 7,
            max_results_per_source: 58,
            web_results_override_limit: 20,
            promoted_source_deadline: Duration::from_millis(6_000),
            source_timeout: Duration::from_millis(10_000),
            prefill: Duration::from_millis(400),
            max_stat_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_source_event_age: Duration::from_secs(30 * 24 * 60 * 60),
            min_impressions_for_source_ranking: 5,
            min_clicks_for_source_ranking: 3,
            max_shortcuts_returned: 12,
            query_thread_core_pool: 4,
            query_thread_max_pool: 6,
            shortcut_refresh_core_pool: 3,
            thread_keepalive: Duration::from_secs(5),
            per_source_concurrent_query_limit: 3,
            cursor_notify_window: Duration::from_millis(100),
            results_cache_capacity: 32,
        }
    }
}
