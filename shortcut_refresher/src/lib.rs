#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! For each shortcut surfaced in a session, confirms with its owning source
//! that the shortcut is still valid, or invalidates it if the source is no
//! longer registered (spec §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use async_latch::AsyncLatch;
use shortcut_store::ShortcutRepository;
use suggestion_model::{ShortcutRecord, SourceIdentifier, Suggestion};
use suggestion_source::SuggestionSource;
use task_executor::Executor;

/// Enabled sources keyed by their identifier, so the refresher can find the
/// owner of a shortcut without the caller threading the whole source list
/// through every call.
pub type SourceRegistry = HashMap<SourceIdentifier, Arc<dyn SuggestionSource>>;

/// Notified once per shortcut as its refresh resolves, so the backer can
/// update (or clear) the displayed row in place (spec §4.6's
/// `refreshShortcut` event).
pub trait ShortcutRefreshReceiver: Send + Sync {
    fn on_shortcut_refreshed(
        &self,
        source: SourceIdentifier,
        shortcut_id: String,
        refreshed: Option<Suggestion>,
    );
}

/// Dispatches `validate_shortcut` calls on a dedicated executor (the
/// `shortcutRefreshCorePool` pool of spec §5), independent from the pool
/// `QueryMultiplexer` uses for ordinary source queries.
pub struct ShortcutRefresher {
    executor: Executor,
    repo: Arc<ShortcutRepository>,
    max_shortcuts_to_refresh: usize,
    cancel: AsyncLatch,
}

impl ShortcutRefresher {
    pub fn new(executor: Executor, repo: Arc<ShortcutRepository>, max_shortcuts_to_refresh: usize) -> Self {
        Self {
            executor,
            repo,
            max_shortcuts_to_refresh,
            cancel: AsyncLatch::new(),
        }
    }

    /// Submits a refresh task for each of `shortcuts`, capped at
    /// `max_shortcuts_to_refresh` (spec §4.5: "capped at
    /// maxResultsToDisplay").
    pub fn refresh(
        &self,
        shortcuts: Vec<ShortcutRecord>,
        sources: &SourceRegistry,
        receiver: Arc<dyn ShortcutRefreshReceiver>,
    ) {
        for shortcut in shortcuts.into_iter().take(self.max_shortcuts_to_refresh) {
            match sources.get(&shortcut.source).cloned() {
                Some(source) => self.refresh_one(shortcut, source, receiver.clone()),
                None => self.invalidate_unknown(shortcut, receiver.clone()),
            }
        }
    }

    /// Cancels all in-flight refresh tasks this instance started. Idempotent.
    pub fn cancel(&self) {
        self.cancel.trigger();
    }

    fn invalidate_unknown(&self, shortcut: ShortcutRecord, receiver: Arc<dyn ShortcutRefreshReceiver>) {
        log::debug!(
            "shortcut_refresher: source {} for shortcut {} is no longer registered; invalidating",
            shortcut.source,
            shortcut.shortcut_id
        );
        let repo = self.repo.clone();
        self.executor.native_spawn(async move {
            repo.refresh_shortcut(&shortcut.source, &shortcut.shortcut_id, None).await;
            receiver.on_shortcut_refreshed(shortcut.source, shortcut.shortcut_id, None);
        });
    }

    fn refresh_one(
        &self,
        shortcut: ShortcutRecord,
        source: Arc<dyn SuggestionSource>,
        receiver: Arc<dyn ShortcutRefreshReceiver>,
    ) {
        let repo = self.repo.clone();
        let cancel = self.cancel.clone();
        self.executor.native_spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.triggered() => return,
                outcome = source.validate_shortcut(&shortcut) => outcome,
            };
            match outcome {
                Ok(refreshed) => {
                    repo.refresh_shortcut(&shortcut.source, &shortcut.shortcut_id, refreshed.clone())
                        .await;
                    receiver.on_shortcut_refreshed(shortcut.source, shortcut.shortcut_id, refreshed);
                }
                Err(err) => {
                    // Per spec §4.5: any exception is logged, shortcut left intact.
                    log::warn!(
                        "shortcut_refresher: validate_shortcut failed for {} ({}): {err}; leaving shortcut intact",
                        shortcut.source,
                        shortcut.shortcut_id
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use suggestion_model::{LaunchIntent, SuggestionConfig, SuggestionFormat};
    use suggestion_source::testing::{FailingSource, FixedSource};

    struct RecordingReceiver {
        events: StdMutex<Vec<(SourceIdentifier, String, Option<Suggestion>)>>,
        notify: tokio::sync::Notify,
        expected: usize,
    }

    impl RecordingReceiver {
        fn new(expected: usize) -> Arc<Self> {
            Arc::new(Self {
                events: StdMutex::new(Vec::new()),
                notify: tokio::sync::Notify::new(),
                expected,
            })
        }

        async fn wait_for_all(&self) {
            loop {
                if self.events.lock().unwrap().len() >= self.expected {
                    return;
                }
                self.notify.notified().await;
            }
        }
    }

    impl ShortcutRefreshReceiver for RecordingReceiver {
        fn on_shortcut_refreshed(
            &self,
            source: SourceIdentifier,
            shortcut_id: String,
            refreshed: Option<Suggestion>,
        ) {
            self.events.lock().unwrap().push((source, shortcut_id, refreshed));
            self.notify.notify_waiters();
        }
    }

    fn sample_shortcut(source: SourceIdentifier) -> ShortcutRecord {
        let suggestion = Suggestion {
            source: source.clone(),
            format: SuggestionFormat::Default,
            title: "Title".to_string(),
            description: None,
            icon1: None,
            icon2: None,
            background_color: None,
            launch: LaunchIntent::default(),
            shortcut_id: "sc-1".to_string(),
            pin_to_bottom: false,
            spinner_while_refreshing: false,
        };
        ShortcutRecord {
            shortcut_id: "sc-1".to_string(),
            source,
            intent_key: "key".to_string(),
            suggestion,
            refreshed: false,
            hit_count: 1,
            last_hit_millis: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_source_is_invalidated() {
        let executor = Executor::new();
        let repo = Arc::new(
            ShortcutRepository::open_in_memory(executor.clone(), SuggestionConfig::default()).unwrap(),
        );
        let refresher = ShortcutRefresher::new(executor, repo.clone(), 7);
        let source = SourceIdentifier::new("pkg", "Gone");
        let shortcut = sample_shortcut(source.clone());

        let receiver = RecordingReceiver::new(1);
        refresher.refresh(vec![shortcut], &SourceRegistry::new(), receiver.clone());

        tokio::time::timeout(Duration::from_secs(1), receiver.wait_for_all())
            .await
            .unwrap();

        let events = receiver.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, source);
        assert!(events[0].2.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn known_source_refresh_replaces_suggestion() {
        let executor = Executor::new();
        let repo = Arc::new(
            ShortcutRepository::open_in_memory(executor.clone(), SuggestionConfig::default()).unwrap(),
        );
        let source_id = SourceIdentifier::new("pkg", "Known");
        let source: Arc<dyn SuggestionSource> =
            Arc::new(FixedSource::new(source_id.clone(), vec!["refreshed"]));
        let mut sources = SourceRegistry::new();
        sources.insert(source_id.clone(), source);

        let refresher = ShortcutRefresher::new(executor, repo, 7);
        let shortcut = sample_shortcut(source_id.clone());
        let receiver = RecordingReceiver::new(1);
        refresher.refresh(vec![shortcut], &sources, receiver.clone());

        tokio::time::timeout(Duration::from_secs(1), receiver.wait_for_all())
            .await
            .unwrap();

        let events = receiver.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].2.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_validate_leaves_shortcut_intact_and_reports_nothing() {
        let executor = Executor::new();
        let repo = Arc::new(
            ShortcutRepository::open_in_memory(executor.clone(), SuggestionConfig::default()).unwrap(),
        );
        let source_id = SourceIdentifier::new("pkg", "Failing");
        let source: Arc<dyn SuggestionSource> = Arc::new(FailingSource::new(source_id.clone()));
        let mut sources = SourceRegistry::new();
        sources.insert(source_id.clone(), source);

        let refresher = ShortcutRefresher::new(executor, repo, 7);
        let shortcut = sample_shortcut(source_id);
        let receiver = RecordingReceiver::new(0);
        refresher.refresh(vec![shortcut], &sources, receiver.clone());

        // Give the task a chance to run; no event should ever arrive.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(receiver.events.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_is_capped_at_max_shortcuts() {
        let executor = Executor::new();
        let repo = Arc::new(
            ShortcutRepository::open_in_memory(executor.clone(), SuggestionConfig::default()).unwrap(),
        );
        let source_id = SourceIdentifier::new("pkg", "Known");
        let source: Arc<dyn SuggestionSource> = Arc::new(FixedSource::new(source_id.clone(), vec!["x"]));
        let mut sources = SourceRegistry::new();
        sources.insert(source_id.clone(), source);

        let refresher = ShortcutRefresher::new(executor, repo, 1);
        let receiver = RecordingReceiver::new(1);
        let shortcuts = vec![sample_shortcut(source_id.clone()), sample_shortcut(source_id)];
        refresher.refresh(shortcuts, &sources, receiver.clone());

        tokio::time::timeout(Duration::from_secs(1), receiver.wait_for_all())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(receiver.events.lock().unwrap().len(), 1);
    }
}
