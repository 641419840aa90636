//! Assembles the ordered snapshot for one session+query: shortcuts up top,
//! promoted source results mixed in round-robin, a deadline-gated "more
//! results" section, and de-duplication against whichever suggestions are
//! already shown (spec §4.6).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use suggestion_model::{
    ShortcutRecord, SourceIdentifier, Suggestion, SuggestionConfig, SuggestionResult,
};

/// Notified whenever a mutating event changes what the next [`Snapshot`]
/// would look like, so the owning `Cursor` can (subject to its own
/// coalescing) re-pull a fresh snapshot. Set once via
/// [`SourceSuggestionBacker::set_listener`] (spec §9, "Cyclic / back
/// references").
pub trait BackerListener: Send + Sync {
    fn on_new_results(&self);
}

/// One row of an assembled snapshot. `MoreExpander`/`Corpus` carry no
/// suggestion content of their own because building that content (icon,
/// label text) is the host UI's job; the backer only tracks which corpora
/// are visible and in what state (spec §4.6 step 6, spec §9's note that the
/// "more" row is "factory-produced").
#[derive(Debug, Clone)]
pub enum SnapshotRow {
    Suggestion(Suggestion),
    MoreExpander,
    Corpus(MoreSourceEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreSourceStatus {
    NotStarted,
    InProgress,
    Finished,
}

/// One row of the "more results" expander's source list (spec §4.6 step 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoreSourceEntry {
    pub source: SourceIdentifier,
    pub status: MoreSourceStatus,
    pub num_results: u32,
    pub query_limit: u32,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub rows: Vec<SnapshotRow>,
    /// Index of the "more" expander row within `rows`, or `rows.len()` if
    /// this snapshot has none (spec §4.6: "Return the index of the 'more'
    /// row (or out.size() if absent)").
    pub more_row_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    NotStarted,
    Pending,
    Reported,
}

struct SourceState {
    progress: Progress,
    reported_before_deadline: bool,
    suggestions: Vec<Suggestion>,
    displayed: usize,
    count: Option<u32>,
    /// `result.suggestions.len()` as originally reported, before dedup
    /// filtering trims `suggestions` down to its survivors. Spec §4.6 step 6
    /// evaluates the "more" inclusion predicate and count against this
    /// original length, not the post-dedup one — a dropped duplicate still
    /// counts toward the source's "more" total.
    reported_len: u32,
    query_limit: u32,
}

impl SourceState {
    fn new() -> Self {
        Self {
            progress: Progress::NotStarted,
            reported_before_deadline: false,
            suggestions: Vec::new(),
            displayed: 0,
            count: None,
            reported_len: 0,
            query_limit: 0,
        }
    }
}

struct Inner {
    shortcuts: Vec<ShortcutRecord>,
    sources: Vec<SourceIdentifier>,
    promoted: HashSet<SourceIdentifier>,
    web_source: Option<SourceIdentifier>,
    go_to_website: Option<Suggestion>,
    search_the_web: Option<Suggestion>,
    pin_to_bottom: Option<Suggestion>,
    dedup_keys: HashSet<String>,
    states: HashMap<SourceIdentifier, SourceState>,
    viewed_non_promoted: HashSet<SourceIdentifier>,
    query_start: Instant,
    max_promoted_slots: usize,
    promoted_deadline: Duration,
    listener: Option<Arc<dyn BackerListener>>,
}

/// Thread-safe via a single internal lock, per spec §5 and §4.6's header.
pub struct SourceSuggestionBacker {
    inner: Mutex<Inner>,
}

fn dedup_key(suggestion: &Suggestion) -> String {
    format!(
        "{}#{}#{}",
        suggestion.launch.action.as_deref().unwrap_or(""),
        suggestion.launch.data_uri.as_deref().unwrap_or(""),
        suggestion.launch.query.as_deref().unwrap_or(""),
    )
}

impl SourceSuggestionBacker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shortcuts: Vec<ShortcutRecord>,
        sources: Vec<SourceIdentifier>,
        promoted: HashSet<SourceIdentifier>,
        web_source: Option<SourceIdentifier>,
        go_to_website: Option<Suggestion>,
        search_the_web: Option<Suggestion>,
        config: &SuggestionConfig,
    ) -> Self {
        let mut dedup_keys = HashSet::new();
        for shortcut in &shortcuts {
            dedup_keys.insert(dedup_key(&shortcut.suggestion));
        }
        Self {
            inner: Mutex::new(Inner {
                shortcuts,
                sources,
                promoted,
                web_source,
                go_to_website,
                search_the_web,
                pin_to_bottom: None,
                dedup_keys,
                states: HashMap::new(),
                viewed_non_promoted: HashSet::new(),
                query_start: Instant::now(),
                max_promoted_slots: config.max_results_to_display,
                promoted_deadline: config.promoted_source_deadline,
                listener: None,
            }),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn BackerListener>) {
        self.inner.lock().listener = Some(listener);
    }

    fn notify(&self, inner: &Inner) {
        if let Some(listener) = &inner.listener {
            listener.on_new_results();
        }
    }

    /// A source's task has begun executing. Returns `true` iff `source` is
    /// **not** promoted, so non-promoted corpora can show a spinner while
    /// the already-displayed list stays put (spec §4.6).
    pub fn report_source_started(&self, source: &SourceIdentifier) -> bool {
        let mut inner = self.inner.lock();
        let state = inner.states.entry(source.clone()).or_insert_with(SourceState::new);
        if state.progress == Progress::NotStarted {
            state.progress = Progress::Pending;
        }
        let not_promoted = !inner.promoted.contains(source);
        self.notify(&inner);
        not_promoted
    }

    /// Stores `result`, extracting a pin-to-bottom suggestion and removing
    /// duplicates against shortcuts and everything already stored (spec
    /// §4.6). Per the resolved Open Question (spec §9 #1), this takes
    /// ownership of `result` rather than mutating a list the caller still
    /// holds a reference to.
    pub fn add_source_results(&self, result: SuggestionResult) {
        let mut inner = self.inner.lock();
        let reported_before_deadline =
            Instant::now().duration_since(inner.query_start) < inner.promoted_deadline;

        let mut suggestions = result.suggestions;
        let reported_len = suggestions.len() as u32;
        if inner.web_source.as_ref() == Some(&result.source) {
            if let Some(last) = suggestions.last() {
                if last.pin_to_bottom {
                    inner.pin_to_bottom = suggestions.pop();
                }
            }
        }

        let mut kept = Vec::with_capacity(suggestions.len());
        for suggestion in suggestions {
            if inner.dedup_keys.insert(dedup_key(&suggestion)) {
                kept.push(suggestion);
            }
        }

        let state = inner.states.entry(result.source.clone()).or_insert_with(SourceState::new);
        state.progress = Progress::Reported;
        state.reported_before_deadline = reported_before_deadline;
        state.count = result.count;
        state.reported_len = reported_len;
        state.query_limit = result.query_limit;
        state.suggestions = kept;

        log::trace!(
            "suggestion_backer: {} reported {:?} with {} suggestions (before_deadline={reported_before_deadline})",
            result.source,
            result.status,
            state.suggestions.len(),
        );
        self.notify(&inner);
    }

    /// Applies a shortcut refresh/invalidation in place. Returns `true` iff
    /// the snapshot actually changed (spec §4.6).
    pub fn refresh_shortcut(
        &self,
        source: &SourceIdentifier,
        shortcut_id: &str,
        refreshed: Option<Suggestion>,
    ) -> bool {
        let mut inner = self.inner.lock();
        let Some(shortcut) = inner
            .shortcuts
            .iter_mut()
            .find(|s| &s.source == source && s.shortcut_id == shortcut_id)
        else {
            return false;
        };

        let changed = match refreshed {
            None => {
                if shortcut.suggestion.spinner_while_refreshing {
                    shortcut.suggestion.icon2 = None;
                    true
                } else {
                    false
                }
            }
            Some(new_suggestion) => {
                shortcut.suggestion = new_suggestion;
                true
            }
        };
        if changed {
            self.notify(&inner);
        }
        changed
    }

    /// Assembles the ordered snapshot for the current state (spec §4.6's
    /// `snapshotSuggestions`).
    pub fn snapshot(&self, expand_more: bool) -> Snapshot {
        let mut inner = self.inner.lock();
        let mut rows = Vec::new();

        if let Some(go_to_website) = &inner.go_to_website {
            rows.push(SnapshotRow::Suggestion(go_to_website.clone()));
        }
        for shortcut in &inner.shortcuts {
            rows.push(SnapshotRow::Suggestion(shortcut.suggestion.clone()));
        }

        let promoted_slots_available = inner.max_promoted_slots.saturating_sub(inner.shortcuts.len());
        let mut slots_remaining = promoted_slots_available;

        // Gather a fixed-order working copy of each promoted,
        // reported-before-deadline, non-empty source's remaining
        // suggestions, so we can round-robin-drain them below without
        // touching the stored state (a fresh snapshot is always derived
        // from scratch; "displayed" bookkeeping is what accumulates).
        let mut iterators: Vec<(SourceIdentifier, VecDeque<Suggestion>)> = inner
            .sources
            .iter()
            .filter(|s| inner.promoted.contains(*s))
            .filter_map(|s| {
                let state = inner.states.get(s)?;
                if state.progress == Progress::Reported
                    && state.reported_before_deadline
                    && !state.suggestions.is_empty()
                {
                    Some((s.clone(), state.suggestions.iter().cloned().collect()))
                } else {
                    None
                }
            })
            .collect();

        let mut displayed: HashMap<SourceIdentifier, usize> = HashMap::new();
        let initial_chunk = if iterators.is_empty() {
            0
        } else {
            (promoted_slots_available / iterators.len()).max(1)
        };
        round_robin_rounds(&mut iterators, initial_chunk, &mut slots_remaining, &mut rows, &mut displayed);

        let reported_promoted =
            inner.promoted.iter().filter(|s| matches!(inner.states.get(*s), Some(st) if st.progress == Progress::Reported)).count();
        let past_deadline = Instant::now().duration_since(inner.query_start) >= inner.promoted_deadline;
        let all_responded = reported_promoted >= inner.promoted.len();
        let showing_more = (past_deadline || all_responded) && !inner.sources.is_empty();

        if showing_more && slots_remaining > 0 {
            iterators.retain(|(_, q)| !q.is_empty());
            if !iterators.is_empty() {
                let new_chunk = (slots_remaining / iterators.len()).max(1);
                round_robin_rounds(&mut iterators, new_chunk, &mut slots_remaining, &mut rows, &mut displayed);
            }
        }

        if showing_more {
            let mut more_sources = Vec::new();
            for source in &inner.sources {
                let entry = match inner.states.get(source) {
                    None => MoreSourceEntry {
                        source: source.clone(),
                        status: MoreSourceStatus::NotStarted,
                        num_results: 0,
                        query_limit: 0,
                    },
                    Some(state) if state.progress != Progress::Reported => MoreSourceEntry {
                        source: source.clone(),
                        status: if state.progress == Progress::Pending {
                            MoreSourceStatus::InProgress
                        } else {
                            MoreSourceStatus::NotStarted
                        },
                        num_results: 0,
                        query_limit: 0,
                    },
                    Some(state) if inner.promoted.contains(source) && state.reported_before_deadline => {
                        let shown = *displayed.get(source).unwrap_or(&0);
                        let total = state.count.unwrap_or(state.reported_len) as usize;
                        if shown >= total {
                            continue;
                        }
                        let showing_pin = inner.web_source.as_ref() == Some(source) && inner.pin_to_bottom.is_some();
                        let pin_adjust = if showing_pin { 1 } else { 0 };
                        MoreSourceEntry {
                            source: source.clone(),
                            status: MoreSourceStatus::Finished,
                            num_results: (total - shown).saturating_sub(pin_adjust) as u32,
                            query_limit: (state.query_limit as usize).saturating_sub(shown).saturating_sub(pin_adjust) as u32,
                        }
                    }
                    Some(state) => MoreSourceEntry {
                        source: source.clone(),
                        status: MoreSourceStatus::Finished,
                        num_results: state.count.unwrap_or(state.reported_len),
                        query_limit: state.query_limit,
                    },
                };
                more_sources.push(entry);
            }

            if let Some(search_the_web) = &inner.search_the_web {
                rows.push(SnapshotRow::Suggestion(search_the_web.clone()));
            }
            if let Some(pinned) = &inner.pin_to_bottom {
                let web_reported_before_deadline = inner
                    .web_source
                    .as_ref()
                    .and_then(|s| inner.states.get(s))
                    .is_some_and(|s| s.reported_before_deadline);
                if web_reported_before_deadline {
                    rows.push(SnapshotRow::Suggestion(pinned.clone()));
                }
            }

            let is_visible = |entry: &MoreSourceEntry, viewed: &HashSet<SourceIdentifier>| {
                entry.num_results > 0 || entry.status != MoreSourceStatus::Finished || viewed.contains(&entry.source)
            };
            let any_corpus_visible = more_sources.iter().any(|e| is_visible(e, &inner.viewed_non_promoted));

            let more_row_index = rows.len();
            if any_corpus_visible {
                rows.push(SnapshotRow::MoreExpander);
                if expand_more {
                    for entry in more_sources {
                        if is_visible(&entry, &inner.viewed_non_promoted) {
                            inner.viewed_non_promoted.insert(entry.source.clone());
                            rows.push(SnapshotRow::Corpus(entry));
                        }
                    }
                    return Snapshot { rows, more_row_index };
                }
            }
            return Snapshot { rows, more_row_index };
        }

        let more_row_index = rows.len();
        Snapshot { rows, more_row_index }
    }
}

/// Round-robins `round_cap` rounds across `iterators`, one item per source
/// per round. Each round reverses the visiting order of the previous one
/// (a boustrophedon sweep) instead of keeping a fixed source order. Spec
/// §8 S3's literal seed (`a1, b1, b2, a2, b3`) depends on this reversal.
fn round_robin_rounds(
    iterators: &mut Vec<(SourceIdentifier, VecDeque<Suggestion>)>,
    round_cap: usize,
    slots_remaining: &mut usize,
    rows: &mut Vec<SnapshotRow>,
    displayed: &mut HashMap<SourceIdentifier, usize>,
) {
    let mut reverse = false;
    'rounds: for _ in 0..round_cap {
        iterators.retain(|(_, q)| !q.is_empty());
        if iterators.is_empty() {
            break;
        }
        let mut any = false;
        let indices: Vec<usize> = if reverse { (0..iterators.len()).rev().collect() } else { (0..iterators.len()).collect() };
        for i in indices {
            if *slots_remaining == 0 {
                break 'rounds;
            }
            let (source, queue) = &mut iterators[i];
            if let Some(item) = queue.pop_front() {
                rows.push(SnapshotRow::Suggestion(item));
                *displayed.entry(source.clone()).or_insert(0) += 1;
                *slots_remaining -= 1;
                any = true;
            }
        }
        reverse = !reverse;
        if !any {
            break;
        }
    }
    iterators.retain(|(_, q)| !q.is_empty());
}
