//! Snapshot-streaming protocol handed to the UI for one query (spec §4.10).
//!
//! The reference implementation expresses its out-of-band calls as a
//! `respond(Bundle)` side channel because its UI toolkit cannot accept richer
//! return types from a cursor; this port has no such toolkit to impedance-
//! match, so (per spec §9's "Cursor-protocol opacity" design note) the same
//! four calls are ordinary typed methods returning plain Rust values.

use std::sync::{Arc, Weak};
use std::time::Duration;

use delayed_executor::DelayedExecutor;
use parking_lot::Mutex;
use suggestion_backer::{BackerListener, Snapshot, SnapshotRow, SourceSuggestionBacker};

/// Notified whenever the cursor's snapshot has changed and is ready to be
/// re-read, coalesced to at most one delivery per `notify_window` (spec
/// §4.10, §5's "Cursor change notifications are idempotent-coalesced").
/// Stands in for the Android `ContentObserver` the reference cursor notifies.
pub trait CursorObserver: Send + Sync {
    fn on_new_results(&self);
}

/// Owned by `SuggestionSession`: the semantic events a cursor's request
/// methods resolve into (spec §4.8's "Cursor listener").
pub trait SessionCursorListener: Send + Sync {
    fn on_close(&self);
    fn on_item_clicked(
        &self,
        rows: &[SnapshotRow],
        pos: usize,
        max_displayed_pos: i64,
        action_key: Option<String>,
        action_msg: Option<String>,
    );
    fn on_search(&self, rows: &[SnapshotRow], query: String, max_displayed_pos: i64);
    fn on_more_visible(&self);
}

/// Answer to `post_refresh`: whether more results might still arrive, and
/// (if the "more" row is already visible) its row index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostRefreshResult {
    pub is_pending: bool,
    pub more_index: Option<usize>,
}

/// Answer to `click`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// `pos` was an ordinary row; the session listener now has the click.
    Forwarded,
    /// `pos` was the "more" expander row: expansion was toggled and the
    /// cursor re-queried. `index` is where the UI should scroll/select.
    ExpandMore { index: usize },
}

struct Inner {
    snapshot: Snapshot,
    expand_more: bool,
    closed: bool,
    notify_scheduled: bool,
    observer: Option<Arc<dyn CursorObserver>>,
}

/// One query's private, coalesced view onto a [`SourceSuggestionBacker`].
pub struct Cursor {
    inner: Mutex<Inner>,
    backer: Arc<SourceSuggestionBacker>,
    delayed: DelayedExecutor,
    notify_window: Duration,
    listener: Arc<dyn SessionCursorListener>,
}

struct BackerBridge(Weak<Cursor>);

impl BackerListener for BackerBridge {
    fn on_new_results(&self) {
        if let Some(cursor) = self.0.upgrade() {
            cursor.schedule_notify();
        }
    }
}

fn clamp_max_displayed(requested: i64, len: usize) -> i64 {
    // Resolves spec §9 Open Question #3: negative-position sentinel for
    // "none displayed" on click.
    if requested < 0 || len == 0 {
        -1
    } else {
        requested.min(len as i64 - 1)
    }
}

impl Cursor {
    /// Builds a cursor backed by `backer` and registers itself as the
    /// backer's listener. `prefill`, if given, seeds the initial snapshot
    /// ahead of the backer's own results (spec §4.8 step 6); `prefill_window`
    /// bounds how long that prefill stays visible before a forced requery.
    pub fn new(
        backer: Arc<SourceSuggestionBacker>,
        delayed: DelayedExecutor,
        notify_window: Duration,
        listener: Arc<dyn SessionCursorListener>,
        prefill: Option<Snapshot>,
        prefill_window: Option<Duration>,
    ) -> Arc<Self> {
        let initial = prefill.unwrap_or_else(|| backer.snapshot(false));
        let cursor = Arc::new(Self {
            inner: Mutex::new(Inner {
                snapshot: initial,
                expand_more: false,
                closed: false,
                notify_scheduled: false,
                observer: None,
            }),
            backer,
            delayed,
            notify_window,
            listener,
        });

        cursor.backer.set_listener(Arc::new(BackerBridge(Arc::downgrade(&cursor))));

        if let Some(window) = prefill_window {
            let weak = Arc::downgrade(&cursor);
            cursor.delayed.post_delayed(
                Box::pin(async move {
                    if let Some(cursor) = weak.upgrade() {
                        cursor.force_notify();
                    }
                }),
                window,
            );
        }

        cursor
    }

    pub fn set_observer(&self, observer: Arc<dyn CursorObserver>) {
        self.inner.lock().observer = Some(observer);
    }

    /// The cursor's current rows, as of the last requery.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().snapshot.clone()
    }

    fn requery(&self) {
        let expand_more = {
            let inner = self.inner.lock();
            inner.expand_more
        };
        let fresh = self.backer.snapshot(expand_more);
        self.inner.lock().snapshot = fresh;
    }

    fn schedule_notify(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.notify_scheduled {
            return;
        }
        inner.notify_scheduled = true;
        drop(inner);

        let weak = Arc::downgrade(self);
        let at = tokio::time::Instant::now() + self.notify_window;
        self.delayed.post_at_time(
            Box::pin(async move {
                if let Some(cursor) = weak.upgrade() {
                    cursor.inner.lock().notify_scheduled = false;
                    cursor.force_notify();
                }
            }),
            at,
        );
    }

    /// Requeries immediately and notifies the observer, bypassing the
    /// coalescing window. Used for the session's own deadline and prefill
    /// timers, which must fire exactly once regardless of what else is
    /// pending.
    fn force_notify(&self) {
        let observer = {
            let inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.observer.clone()
        };
        self.requery();
        if let Some(observer) = observer {
            observer.on_new_results();
        }
    }

    /// Arms a forced notify at `at`, used by the session to guarantee a
    /// "more results" re-pull even if every promoted source stays silent
    /// (spec §4.8 step 9).
    pub fn arm_deadline_notify(self: &Arc<Self>, at: Duration) {
        let weak = Arc::downgrade(self);
        self.delayed.post_delayed(
            Box::pin(async move {
                if let Some(cursor) = weak.upgrade() {
                    cursor.force_notify();
                }
            }),
            at,
        );
    }

    pub fn post_refresh(&self) -> PostRefreshResult {
        let inner = self.inner.lock();
        let more_present = inner.snapshot.more_row_index < inner.snapshot.rows.len();
        PostRefreshResult {
            is_pending: !more_present,
            more_index: more_present.then_some(inner.snapshot.more_row_index),
        }
    }

    pub fn click(
        &self,
        pos: usize,
        max_displayed_pos: i64,
        action_key: Option<String>,
        action_msg: Option<String>,
    ) -> ClickOutcome {
        let (rows, more_row_index) = {
            let inner = self.inner.lock();
            (inner.snapshot.rows.clone(), inner.snapshot.more_row_index)
        };

        if pos == more_row_index && matches!(rows.get(pos), Some(SnapshotRow::MoreExpander)) {
            {
                let mut inner = self.inner.lock();
                inner.expand_more = !inner.expand_more;
            }
            self.requery();
            let index = self.inner.lock().snapshot.more_row_index;
            return ClickOutcome::ExpandMore { index };
        }

        let clamped = clamp_max_displayed(max_displayed_pos, rows.len());
        self.listener.on_item_clicked(&rows, pos, clamped, action_key, action_msg);
        ClickOutcome::Forwarded
    }

    pub fn thresh_hit(&self) {
        self.listener.on_more_visible();
    }

    pub fn search(&self, query: String, max_displayed_pos: i64) {
        let rows = self.inner.lock().snapshot.rows.clone();
        let clamped = clamp_max_displayed(max_displayed_pos, rows.len());
        self.listener.on_search(&rows, query, clamped);
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        self.listener.on_close();
    }
}
