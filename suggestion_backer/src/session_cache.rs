//! Per-session memo of what's already been asked and answered this session,
//! so a session doesn't re-query a source that has already said "nothing
//! here" for a shorter prefix, and doesn't re-refresh a shortcut it already
//! refreshed this session (spec §4.7).

use std::collections::{HashMap, HashSet};

use lru::LruCache;
use parking_lot::Mutex;
use suggestion_model::{SourceIdentifier, SuggestionConfig, SuggestionResult, SuggestionStatus};

struct Inner {
    zero_result_sources: HashMap<String, HashSet<SourceIdentifier>>,
    refreshed_shortcuts: HashMap<String, Option<String>>,
    results_cache: LruCache<String, HashMap<SourceIdentifier, SuggestionResult>>,
}

/// Guards its three maps behind one lock, mirroring the single-lock-per-
/// instance convention the rest of this workspace's session-scoped types
/// follow (spec §5).
pub struct SessionCache {
    inner: Mutex<Inner>,
}

fn refreshed_key(source: &SourceIdentifier, shortcut_id: &str) -> String {
    format!("{}#{}", source.flatten(), shortcut_id)
}

impl SessionCache {
    pub fn new(config: &SuggestionConfig) -> Self {
        let capacity = std::num::NonZeroUsize::new(config.results_cache_capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(Inner {
                zero_result_sources: HashMap::new(),
                refreshed_shortcuts: HashMap::new(),
                results_cache: LruCache::new(capacity),
            }),
        }
    }

    /// True iff some strict prefix of `query` previously saw `source` answer
    /// OK with zero suggestions while opting out of `queryAfterZeroResults`.
    pub fn has_reported_zero_results_for_prefix(&self, query: &str, source: &SourceIdentifier) -> bool {
        let inner = self.inner.lock();
        inner.zero_result_sources.iter().any(|(prefix, sources)| {
            prefix.len() < query.len() && query.starts_with(prefix.as_str()) && sources.contains(source)
        })
    }

    /// Records `result` for `(query, result.source)`, and if it's an
    /// opted-out zero-result answer, marks `query` as a zero-result prefix
    /// for that source (spec §4.7's `reportSourceResult`).
    pub fn report_source_result(&self, query: &str, result: &SuggestionResult, query_after_zero_results: bool) {
        let mut inner = self.inner.lock();
        inner
            .results_cache
            .get_or_insert_mut(query.to_string(), HashMap::new)
            .insert(result.source.clone(), result.clone());

        if result.status == SuggestionStatus::Ok && result.suggestions.is_empty() && !query_after_zero_results {
            inner
                .zero_result_sources
                .entry(query.to_string())
                .or_default()
                .insert(result.source.clone());
        }
    }

    /// The cached result for `(query, source)`, if this session has one.
    pub fn cached_result(&self, query: &str, source: &SourceIdentifier) -> Option<SuggestionResult> {
        let mut inner = self.inner.lock();
        inner.results_cache.get(query).and_then(|by_source| by_source.get(source)).cloned()
    }

    /// Whether `(source, shortcut_id)` has already been refreshed this
    /// session, and if so, the `icon2` it was asked to show (`None` meaning
    /// the refresh asked for no icon2, as distinct from "not refreshed yet").
    pub fn refreshed_icon2(&self, source: &SourceIdentifier, shortcut_id: &str) -> Option<Option<String>> {
        self.inner.lock().refreshed_shortcuts.get(&refreshed_key(source, shortcut_id)).cloned()
    }

    pub fn is_refreshed(&self, source: &SourceIdentifier, shortcut_id: &str) -> bool {
        self.inner.lock().refreshed_shortcuts.contains_key(&refreshed_key(source, shortcut_id))
    }

    pub fn mark_refreshed(&self, source: &SourceIdentifier, shortcut_id: &str, icon2: Option<String>) {
        self.inner.lock().refreshed_shortcuts.insert(refreshed_key(source, shortcut_id), icon2);
    }
}
