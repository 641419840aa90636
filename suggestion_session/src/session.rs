//! Orchestrates one session's queries: builds the per-query fan-out through
//! an `AsyncMux`, mixes results into a `Cursor`, and turns cursor events
//! back into shortcut/source bookkeeping (spec §4.8).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use query_multiplexer::{MultiplexerReceiver, QueryMultiplexer, SourceQuery};
use shortcut_refresher::{ShortcutRefreshReceiver, ShortcutRefresher, SourceRegistry};
use shortcut_store::{ReportedStats, ShortcutRepository};
use suggestion_backer::{SessionCache, SnapshotRow, SourceSuggestionBacker};
use suggestion_model::{ShortcutRecord, SourceIdentifier, Suggestion, SuggestionConfig, SuggestionResult};
use suggestion_source::SuggestionSource;
use task_executor::Executor;

use crate::cursor::{Cursor, SessionCursorListener};
use crate::source_orderer::SourceOrderer;

/// Identity tagging suggestions the session builds itself (the "go to
/// website"/"search the web" rows) rather than one belonging to a real
/// registered source (spec §4.8 step 4, §9's "factory-produced" rows).
pub fn built_in_source() -> SourceIdentifier {
    SourceIdentifier::new("__session__", "__builtin__")
}

/// Builds the two synthetic, factory-produced rows a session mixes in
/// ahead of/after a source's own results. Left to the embedder because
/// neither the URL-detection heuristic nor the suggestions' icon/label
/// text is this crate's concern (spec §4.8 step 4).
pub trait SuggestionFactories: Send + Sync {
    fn go_to_website(&self, query: &str) -> Option<Suggestion>;
    fn search_the_web(&self, query: &str) -> Option<Suggestion>;
}

/// Where a clicked row came from, for the click-log out-channel (spec §6's
/// external interfaces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Web,
    BuiltIn,
    Other,
}

/// Sink for click events a session reports, independent of the durable
/// shortcut store, so a daemon can fan clicks out to analytics without
/// coupling to `ShortcutRepository` (spec §6).
pub trait ClickLogger: Send + Sync {
    fn log_click(&self, source: &SourceIdentifier, slot: SlotKind, position: usize);
}

/// One source this session knows about, plus the policy questions the
/// session must answer about it rather than the source itself (spec §4.8
/// step 3's query-length threshold, §4.9's trust allow-list).
#[derive(Clone)]
pub struct RegisteredSource {
    pub source: Arc<dyn SuggestionSource>,
    pub is_web: bool,
    pub trusted: bool,
    pub min_query_length: usize,
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before the unix epoch").as_millis() as i64
}

fn visible_slice(rows: &[SnapshotRow], max_displayed_pos: i64) -> &[SnapshotRow] {
    if max_displayed_pos < 0 || rows.is_empty() {
        return &[];
    }
    let end = (max_displayed_pos as usize).min(rows.len() - 1);
    &rows[..=end]
}

/// Classifies each visible row into an impression, per spec §4.8's
/// `onItemClicked`/`onSearch`: a real suggestion's own source; a corpus
/// selector under "more" counts its decoded source only if that source has
/// started (`NotStarted` corpora are never shown as having been seen);
/// built-in rows (go-to-website/search-the-web) carry no source impression.
fn source_impressions(rows: &[SnapshotRow]) -> Vec<SourceIdentifier> {
    rows.iter()
        .filter_map(|row| match row {
            SnapshotRow::Suggestion(s) if s.source != built_in_source() => Some(s.source.clone()),
            SnapshotRow::Corpus(entry) if entry.status != suggestion_backer::MoreSourceStatus::NotStarted => {
                Some(entry.source.clone())
            }
            _ => None,
        })
        .collect()
}

struct AsyncMux {
    backer: Arc<SourceSuggestionBacker>,
    cache: Arc<SessionCache>,
    query: String,
    query_after_zero: HashMap<SourceIdentifier, bool>,
    mux: QueryMultiplexer,
    refresher: ShortcutRefresher,
    additional: Mutex<Option<Vec<SourceQuery>>>,
    additional_sent: AtomicBool,
}

impl MultiplexerReceiver for AsyncMux {
    fn on_source_start(&self, source: &SourceIdentifier) {
        self.backer.report_source_started(source);
    }

    fn on_new_suggestion_result(&self, result: SuggestionResult) {
        let query_after_zero = self.query_after_zero.get(&result.source).copied().unwrap_or(false);
        self.cache.report_source_result(&self.query, &result, query_after_zero);
        self.backer.add_source_results(result);
    }
}

impl ShortcutRefreshReceiver for AsyncMux {
    fn on_shortcut_refreshed(&self, source: SourceIdentifier, shortcut_id: String, refreshed: Option<Suggestion>) {
        let icon2 = refreshed.as_ref().and_then(|s| s.icon2.clone());
        self.cache.mark_refreshed(&source, &shortcut_id, icon2);
        self.backer.refresh_shortcut(&source, &shortcut_id, refreshed);
    }
}

impl AsyncMux {
    fn send_off_promoted(self: &Arc<Self>, promoted: Vec<SourceQuery>) {
        self.mux.query(&self.query, promoted, self.clone());
    }

    /// Sends the sources held back from the initial fan-out, once (spec
    /// §4.8's `onMoreVisible`). Returns `false` if already sent.
    fn send_off_additional(self: &Arc<Self>) -> bool {
        if self.additional_sent.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return false;
        }
        if let Some(sources) = self.additional.lock().take() {
            self.mux.query(&self.query, sources, self.clone());
        }
        true
    }

    fn send_off_refreshers(self: &Arc<Self>, shortcuts: Vec<ShortcutRecord>, registry: &SourceRegistry) {
        self.refresher.refresh(shortcuts, registry, self.clone());
    }

    fn cancel(&self) {
        self.mux.cancel();
        self.refresher.cancel();
    }
}

struct SessionState {
    current: Option<Arc<Cursor>>,
    current_query: String,
    outstanding_cursors: usize,
}

/// Owns one user's query stream: registered sources, the durable shortcut
/// store, and the single active `AsyncMux`/`Cursor` pair for whatever query
/// is most recent (spec §4.8).
pub struct SuggestionSession {
    repo: Arc<ShortcutRepository>,
    cache: Arc<SessionCache>,
    executor_refresh: Executor,
    per_tag: per_tag_executor::PerTagExecutor,
    delayed: delayed_executor::DelayedExecutor,
    config: SuggestionConfig,
    registry: SourceRegistry,
    all_sources: Vec<RegisteredSource>,
    manager: SourceOrderer,
    web_source: Option<SourceIdentifier>,
    factories: Arc<dyn SuggestionFactories>,
    click_logger: Option<Arc<dyn ClickLogger>>,
    state: Mutex<SessionState>,
    active_mux: Mutex<Option<Arc<AsyncMux>>>,
    on_all_closed: Arc<dyn Fn() + Send + Sync>,
}

impl SuggestionSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<ShortcutRepository>,
        executor_query: Executor,
        executor_refresh: Executor,
        config: SuggestionConfig,
        sources: Vec<RegisteredSource>,
        web_source: Option<SourceIdentifier>,
        factories: Arc<dyn SuggestionFactories>,
        click_logger: Option<Arc<dyn ClickLogger>>,
        on_all_closed: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        let per_tag = per_tag_executor::PerTagExecutor::new(executor_query.clone(), config.per_source_concurrent_query_limit);
        let delayed = delayed_executor::DelayedExecutor::new(&executor_query);
        let cache = Arc::new(SessionCache::new(&config));
        let manager = SourceOrderer::new(repo.clone(), config.clone());

        let mut registry: SourceRegistry = HashMap::new();
        for registered in &sources {
            registry.insert(registered.source.identifier().clone(), registered.source.clone());
        }

        Arc::new(Self {
            repo,
            cache,
            executor_refresh,
            per_tag,
            delayed,
            config,
            registry,
            all_sources: sources,
            manager,
            web_source,
            factories,
            click_logger,
            state: Mutex::new(SessionState { current: None, current_query: String::new(), outstanding_cursors: 0 }),
            active_mux: Mutex::new(None),
            on_all_closed,
        })
    }

    fn classify_slot(&self, source: &SourceIdentifier) -> SlotKind {
        if *source == built_in_source() {
            SlotKind::BuiltIn
        } else if self.web_source.as_ref() == Some(source) {
            SlotKind::Web
        } else {
            SlotKind::Other
        }
    }

    /// Issues a fresh query: reconciles shortcuts against this session's
    /// cache, asks the `SourceOrderer` which sources get promoted slots,
    /// and returns a new `Cursor` streaming the mixed result (spec §4.8
    /// steps 1-9).
    pub async fn query(self: &Arc<Self>, query: &str) -> Arc<Cursor> {
        let query = query.trim().to_string();

        let mut shortcuts = self.repo.get_shortcuts_for_query(&query).await.unwrap_or_default();
        shortcuts.retain(|s| self.registry.contains_key(&s.source));

        let mut needs_refresh = Vec::new();
        for shortcut in &mut shortcuts {
            if self.cache.is_refreshed(&shortcut.source, &shortcut.shortcut_id) {
                shortcut.refreshed = true;
                if shortcut.suggestion.spinner_while_refreshing {
                    if let Some(icon2) = self.cache.refreshed_icon2(&shortcut.source, &shortcut.shortcut_id) {
                        shortcut.suggestion.icon2 = icon2;
                    }
                }
            } else {
                needs_refresh.push(shortcut.clone());
            }
        }

        let available: Vec<RegisteredSource> = self
            .all_sources
            .iter()
            .filter(|r| query.chars().count() >= r.min_query_length)
            .filter(|r| !self.cache.has_reported_zero_results_for_prefix(&query, r.source.identifier()))
            .cloned()
            .collect();

        let (promoted, additional) = self.manager.order_sources(available, self.web_source.as_ref()).await;

        let promoted_set: HashSet<SourceIdentifier> = promoted.iter().map(|r| r.source.identifier().clone()).collect();
        let mut sources_list: Vec<SourceIdentifier> = promoted.iter().map(|r| r.source.identifier().clone()).collect();
        sources_list.extend(additional.iter().map(|r| r.source.identifier().clone()));

        let go_to_website = self.factories.go_to_website(&query);
        let search_the_web = self.factories.search_the_web(&query);

        let backer = Arc::new(SourceSuggestionBacker::new(
            shortcuts,
            sources_list,
            promoted_set,
            self.web_source.clone(),
            go_to_website,
            search_the_web,
            &self.config,
        ));

        let query_after_zero: HashMap<SourceIdentifier, bool> = promoted
            .iter()
            .chain(additional.iter())
            .map(|r| (r.source.identifier().clone(), r.source.query_after_zero_results()))
            .collect();

        let additional_queries: Vec<SourceQuery> =
            additional.iter().map(|r| SourceQuery { source: r.source.clone(), is_web: r.is_web }).collect();
        let promoted_queries: Vec<SourceQuery> =
            promoted.iter().map(|r| SourceQuery { source: r.source.clone(), is_web: r.is_web }).collect();

        let mux = Arc::new(AsyncMux {
            backer: backer.clone(),
            cache: self.cache.clone(),
            query: query.clone(),
            query_after_zero,
            mux: QueryMultiplexer::new(self.per_tag.clone(), self.delayed.clone(), self.config.clone()),
            refresher: ShortcutRefresher::new(self.executor_refresh.clone(), self.repo.clone(), self.config.max_results_to_display),
            additional: Mutex::new(Some(additional_queries)),
            additional_sent: AtomicBool::new(false),
        });

        // Reuse whatever the previous cursor was showing as an immediate
        // placeholder, bounded by `config.prefill`, so the UI doesn't flash
        // empty while the new query's sources are still in flight. Skipped
        // on very short queries, where stale results are more misleading
        // than an empty list.
        let prefill = {
            let state = self.state.lock();
            if query.chars().count() > 1 {
                state.current.as_ref().map(|c| c.snapshot())
            } else {
                None
            }
        };
        let prefill_window = prefill.as_ref().map(|_| self.config.prefill);

        let cursor = Cursor::new(backer, self.delayed.clone(), self.config.cursor_notify_window, self.clone(), prefill, prefill_window);
        cursor.arm_deadline_notify(self.config.promoted_source_deadline);

        let previous_mux = {
            let mut state = self.state.lock();
            state.current = Some(cursor.clone());
            state.current_query = query.clone();
            state.outstanding_cursors += 1;
            self.active_mux.lock().replace(mux.clone())
        };
        if let Some(previous) = previous_mux {
            previous.cancel();
        }

        mux.send_off_refreshers(needs_refresh, &self.registry);
        mux.send_off_promoted(promoted_queries);

        cursor
    }
}

impl SessionCursorListener for SuggestionSession {
    fn on_close(&self) {
        let should_close = {
            let mut state = self.state.lock();
            state.outstanding_cursors = state.outstanding_cursors.saturating_sub(1);
            state.outstanding_cursors == 0
        };
        if should_close {
            if let Some(mux) = self.active_mux.lock().take() {
                mux.cancel();
            }
            (self.on_all_closed)();
        }
    }

    fn on_item_clicked(
        &self,
        rows: &[SnapshotRow],
        pos: usize,
        max_displayed_pos: i64,
        _action_key: Option<String>,
        _action_msg: Option<String>,
    ) {
        let visible = visible_slice(rows, max_displayed_pos);
        let source_impressions = source_impressions(visible);
        // Only a real source's own suggestion is recorded as a click (spec
        // §4.8: built-in rows are ignored; `ShortcutRepository::report_stats`
        // separately drops anything with `shortcut_id == NEVER_SHORTCUT`).
        let clicked = match rows.get(pos) {
            Some(SnapshotRow::Suggestion(s)) if s.source != built_in_source() => Some(s.clone()),
            _ => None,
        };

        if let Some(suggestion) = &clicked {
            if let Some(logger) = &self.click_logger {
                logger.log_click(&suggestion.source, self.classify_slot(&suggestion.source), pos);
            }
        }

        let query = self.state.lock().current_query.clone();
        let repo = self.repo.clone();
        self.executor_refresh.native_spawn(async move {
            repo.report_stats(ReportedStats { query, clicked, source_impressions }, now_millis()).await;
        });
    }

    fn on_search(&self, rows: &[SnapshotRow], query: String, max_displayed_pos: i64) {
        let visible = visible_slice(rows, max_displayed_pos);
        let source_impressions = source_impressions(visible);
        let clicked = self.factories.search_the_web(&query);

        if let Some(suggestion) = &clicked {
            if let Some(logger) = &self.click_logger {
                logger.log_click(&suggestion.source, SlotKind::Web, max_displayed_pos.max(0) as usize);
            }
        }

        let repo = self.repo.clone();
        self.executor_refresh.native_spawn(async move {
            repo.report_stats(ReportedStats { query, clicked, source_impressions }, now_millis()).await;
        });
    }

    fn on_more_visible(&self) {
        if let Some(mux) = self.active_mux.lock().clone() {
            mux.send_off_additional();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ClickOutcome;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use suggestion_source::testing::FixedSource;

    struct NoFactories;
    impl SuggestionFactories for NoFactories {
        fn go_to_website(&self, _query: &str) -> Option<Suggestion> {
            None
        }
        fn search_the_web(&self, _query: &str) -> Option<Suggestion> {
            None
        }
    }

    fn build_session(config: SuggestionConfig, sources: Vec<RegisteredSource>) -> (Arc<SuggestionSession>, Arc<ShortcutRepository>) {
        let executor = Executor::new();
        let repo = Arc::new(ShortcutRepository::open_in_memory(executor.clone(), config.clone()).unwrap());
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_for_cb = closed.clone();
        let session = SuggestionSession::new(
            repo.clone(),
            executor.clone(),
            executor,
            config,
            sources,
            None,
            Arc::new(NoFactories),
            None,
            Arc::new(move || {
                closed_for_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (session, repo)
    }

    fn registered(name: &str) -> RegisteredSource {
        let identifier = SourceIdentifier::new("pkg", name);
        RegisteredSource {
            source: Arc::new(FixedSource::new(identifier, vec!["r1", "r2"])),
            is_web: false,
            trusted: true,
            min_query_length: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_returns_results_from_a_promoted_source() {
        let mut config = SuggestionConfig::default();
        config.promoted_source_deadline = Duration::from_millis(5);
        config.cursor_notify_window = Duration::from_millis(5);
        let (session, _repo) = build_session(config, vec![registered("A")]);

        let cursor = session.query("r").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let snapshot = cursor.snapshot();
        let titles: Vec<String> = snapshot
            .rows
            .iter()
            .filter_map(|row| match row {
                SnapshotRow::Suggestion(s) => Some(s.title.clone()),
                _ => None,
            })
            .collect();
        assert!(titles.contains(&"r1".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn short_query_is_excluded_by_min_query_length() {
        let mut config = SuggestionConfig::default();
        config.promoted_source_deadline = Duration::from_millis(5);
        config.cursor_notify_window = Duration::from_millis(5);
        let mut source = registered("A");
        source.min_query_length = 3;
        let (session, _repo) = build_session(config, vec![source]);

        let cursor = session.query("r").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let snapshot = cursor.snapshot();
        assert!(snapshot.rows.iter().all(|row| !matches!(row, SnapshotRow::Suggestion(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_result_prefix_is_not_requeried_on_a_longer_query() {
        let mut config = SuggestionConfig::default();
        config.promoted_source_deadline = Duration::from_millis(5);
        config.cursor_notify_window = Duration::from_millis(5);
        let identifier = SourceIdentifier::new("pkg", "Empty");
        let source = RegisteredSource {
            source: Arc::new(FixedSource::new(identifier.clone(), vec![])),
            is_web: false,
            trusted: true,
            min_query_length: 0,
        };
        let (session, _repo) = build_session(config, vec![source.clone()]);

        let first = session.query("a").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = first.snapshot();

        assert!(session.cache.has_reported_zero_results_for_prefix("ab", &identifier));

        let second = session.query("ab").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = second.snapshot();
        assert!(snapshot.rows.is_empty() || snapshot.more_row_index == snapshot.rows.len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn more_visible_sends_off_the_held_back_additional_sources() {
        let mut config = SuggestionConfig::default();
        config.promoted_source_deadline = Duration::from_millis(5);
        config.cursor_notify_window = Duration::from_millis(5);
        config.num_promoted_sources = 1;
        let identifier_b = SourceIdentifier::new("pkg", "B");
        let source_b = Arc::new(FixedSource::new(identifier_b, vec!["b1"]));
        let query_count = source_b.query_count.clone();
        // Untrusted and with no ranking history: step 4 of `orderSources`
        // drops it straight into `additional` regardless of
        // `num_promoted_sources`, unlike a trusted source which would be
        // promoted unconditionally (spec §4.9; see `source_orderer.rs`).
        let registered_b = RegisteredSource { source: source_b, is_web: false, trusted: false, min_query_length: 0 };
        let (session, _repo) = build_session(config, vec![registered("A"), registered_b]);

        let cursor = session.query("r").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(query_count.load(Ordering::SeqCst), 0, "additional source must not be queried yet");

        cursor.thresh_hit();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(query_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clicking_a_suggestion_reports_stats_to_the_repository() {
        let mut config = SuggestionConfig::default();
        config.promoted_source_deadline = Duration::from_millis(5);
        config.cursor_notify_window = Duration::from_millis(5);
        let (session, repo) = build_session(config, vec![registered("A")]);

        let cursor = session.query("r").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let outcome = cursor.click(0, 5, None, None);
        assert_eq!(outcome, ClickOutcome::Forwarded);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let ranking = repo.get_source_ranking(0, 0).await.unwrap();
        assert!(!ranking.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closing_the_only_cursor_invokes_the_session_closed_callback() {
        let mut config = SuggestionConfig::default();
        config.promoted_source_deadline = Duration::from_millis(5);
        config.cursor_notify_window = Duration::from_millis(5);
        let executor = Executor::new();
        let repo = Arc::new(ShortcutRepository::open_in_memory(executor.clone(), config.clone()).unwrap());
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_for_cb = closed.clone();
        let session = SuggestionSession::new(
            repo,
            executor.clone(),
            executor,
            config,
            vec![registered("A")],
            None,
            Arc::new(NoFactories),
            None,
            Arc::new(move || {
                closed_for_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let cursor = session.query("r").await;
        cursor.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
