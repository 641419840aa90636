#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! Fans one query out to N sources through a [`PerTagExecutor`], enforcing a
//! per-source timeout and surfacing each reply to a receiver exactly once
//! (spec §4.3).
//!
//! Each source's task is submitted under a tag equal to the source's
//! canonical string form, so `PerTagExecutor`'s per-tag concurrency cap
//! naturally becomes this system's per-source concurrency cap. Sources that
//! are still queued (not yet dispatched) when `source_timeout` elapses since
//! *submission* are also timed out, per spec §4.3 step 6 — not just sources
//! that are slow once running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_latch::AsyncLatch;
use delayed_executor::DelayedExecutor;
use per_tag_executor::PerTagExecutor;
use suggestion_model::{SourceIdentifier, SuggestionConfig, SuggestionResult};
use suggestion_source::SuggestionSource;

/// Receives the callbacks the multiplexer makes as each source's task moves
/// through its lifecycle. Implemented by `SuggestionSession`'s `AsyncMux`
/// wrapper around the `SourceSuggestionBacker`.
pub trait MultiplexerReceiver: Send + Sync {
    /// The source's task has begun executing (as opposed to merely being
    /// submitted — it may still be queued behind other tags' work).
    fn on_source_start(&self, source: &SourceIdentifier);

    /// Exactly one of these fires per source queried, whatever the outcome.
    fn on_new_suggestion_result(&self, result: SuggestionResult);
}

/// One source to query, and whether it should be treated as the web source
/// for the purposes of `web_results_override_limit` (spec §4.3 step 1).
pub struct SourceQuery {
    pub source: Arc<dyn SuggestionSource>,
    pub is_web: bool,
}

/// Issues one query to each of a set of sources and reports each result to a
/// receiver exactly once. A fresh `QueryMultiplexer` is constructed per
/// fan-out (one per `query()` call from the session); `cancel` is idempotent
/// and stops all of this instance's in-flight tasks.
pub struct QueryMultiplexer {
    per_tag: PerTagExecutor,
    delayed: DelayedExecutor,
    config: SuggestionConfig,
    cancel: AsyncLatch,
}

impl QueryMultiplexer {
    pub fn new(per_tag: PerTagExecutor, delayed: DelayedExecutor, config: SuggestionConfig) -> Self {
        Self {
            per_tag,
            delayed,
            config,
            cancel: AsyncLatch::new(),
        }
    }

    /// Fires off a task per source in `sources`, each of which will call
    /// back into `receiver` exactly once with its `SuggestionResult`.
    pub fn query(
        &self,
        prefix: &str,
        sources: Vec<SourceQuery>,
        receiver: Arc<dyn MultiplexerReceiver>,
    ) {
        for source_query in sources {
            self.query_one(prefix, source_query, receiver.clone());
        }
    }

    /// Cancels all in-flight tasks this multiplexer has started. Idempotent;
    /// any task still running synthesizes a CANCELED result for its source.
    pub fn cancel(&self) {
        self.cancel.trigger();
    }

    fn query_one(&self, prefix: &str, source_query: SourceQuery, receiver: Arc<dyn MultiplexerReceiver>) {
        let SourceQuery { source, is_web } = source_query;
        let identifier = source.identifier().clone();
        let max_results = if is_web {
            self.config.web_results_override_limit
        } else {
            self.config.max_results_per_source
        };
        // Spec §3 / §4.3 step 1: `queryLimit` is the advisory cap passed to
        // the source, echoed back in its `SuggestionResult`; nothing in the
        // config distinguishes it from `maxResults`, so the two are the same
        // value threaded through two separate parameters.
        let query_limit = max_results as u32;
        let prefix = prefix.to_string();
        let source_timeout = self.config.source_timeout;
        let cancel = self.cancel.clone();

        // Delivered guards against the queued-timeout and the in-task
        // timeout racing to report the same source twice (spec §8: exactly
        // one result is ever delivered per source).
        let delivered = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));

        let started_for_task = started.clone();
        let delivered_for_task = delivered.clone();
        let receiver_for_task = receiver.clone();
        let identifier_for_task = identifier.clone();

        let runnable: per_tag_executor::Runnable = Box::pin(async move {
            started_for_task.store(true, Ordering::SeqCst);
            receiver_for_task.on_source_start(&identifier_for_task);

            let result = tokio::select! {
                biased;
                () = cancel.triggered() => {
                    log::trace!("query_multiplexer: canceling in-flight query to {identifier_for_task}");
                    SuggestionResult::canceled(identifier_for_task.clone(), query_limit)
                }
                () = tokio::time::sleep(source_timeout) => {
                    log::debug!("query_multiplexer: {identifier_for_task} timed out after {source_timeout:?}");
                    SuggestionResult::canceled(identifier_for_task.clone(), query_limit)
                }
                outcome = source.query(&prefix, max_results, query_limit) => {
                    match outcome {
                        Ok(result) => result,
                        Err(err) => {
                            log::warn!("query_multiplexer: {identifier_for_task} failed: {err}");
                            SuggestionResult::error(identifier_for_task.clone(), query_limit)
                        }
                    }
                }
            };

            if delivered_for_task.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                receiver_for_task.on_new_suggestion_result(result);
            }
        });

        let queued = self.per_tag.execute(identifier.flatten(), runnable);

        if queued {
            // The task hasn't started yet; if it still hasn't by
            // `source_timeout` after *this* submission, time it out even
            // though it never got a chance to run (spec §4.3 step 6).
            self.delayed.post_delayed(
                Box::pin(async move {
                    if !started.load(Ordering::SeqCst)
                        && delivered.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
                    {
                        log::debug!(
                            "query_multiplexer: {identifier} timed out while still queued behind its concurrency cap"
                        );
                        receiver.on_new_suggestion_result(SuggestionResult::canceled(
                            identifier,
                            query_limit,
                        ));
                    }
                }),
                source_timeout,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use suggestion_model::SuggestionStatus;
    use suggestion_source::testing::{FailingSource, FixedSource, SlowSource};
    use task_executor::Executor;

    struct CollectingReceiver {
        starts: StdMutex<Vec<SourceIdentifier>>,
        results: StdMutex<Vec<SuggestionResult>>,
        notify: tokio::sync::Notify,
        expected: usize,
    }

    impl CollectingReceiver {
        fn new(expected: usize) -> Arc<Self> {
            Arc::new(Self {
                starts: StdMutex::new(Vec::new()),
                results: StdMutex::new(Vec::new()),
                notify: tokio::sync::Notify::new(),
                expected,
            })
        }

        async fn wait_for_all(&self) {
            loop {
                if self.results.lock().unwrap().len() >= self.expected {
                    return;
                }
                self.notify.notified().await;
            }
        }
    }

    impl MultiplexerReceiver for CollectingReceiver {
        fn on_source_start(&self, source: &SourceIdentifier) {
            self.starts.lock().unwrap().push(source.clone());
        }

        fn on_new_suggestion_result(&self, result: SuggestionResult) {
            self.results.lock().unwrap().push(result);
            self.notify.notify_waiters();
        }
    }

    fn build_mux(config: SuggestionConfig) -> QueryMultiplexer {
        let executor = Executor::new();
        let per_tag = PerTagExecutor::new(executor.clone(), config.per_source_concurrent_query_limit);
        let delayed = DelayedExecutor::new(&executor);
        QueryMultiplexer::new(per_tag, delayed, config)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivers_exactly_one_result_per_source() {
        let mux = build_mux(SuggestionConfig::default());
        let a = Arc::new(FixedSource::new(SourceIdentifier::new("pkg", "A"), vec!["a1", "a2"]));
        let b = Arc::new(FailingSource::new(SourceIdentifier::new("pkg", "B")));
        let receiver = CollectingReceiver::new(2);

        mux.query(
            "q",
            vec![
                SourceQuery { source: a, is_web: false },
                SourceQuery { source: b, is_web: false },
            ],
            receiver.clone(),
        );

        tokio::time::timeout(Duration::from_secs(1), receiver.wait_for_all())
            .await
            .unwrap();

        let results = receiver.results.lock().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.status == SuggestionStatus::Ok));
        assert!(results.iter().any(|r| r.status == SuggestionStatus::Error));
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn slow_source_times_out_as_canceled() {
        let mut config = SuggestionConfig::default();
        config.source_timeout = Duration::from_millis(20);
        let mux = build_mux(config);
        let slow = Arc::new(SlowSource::new(SourceIdentifier::new("pkg", "Slow"), Duration::from_secs(5)));
        let receiver = CollectingReceiver::new(1);

        mux.query("q", vec![SourceQuery { source: slow, is_web: false }], receiver.clone());

        tokio::time::timeout(Duration::from_secs(1), receiver.wait_for_all())
            .await
            .unwrap();

        let results = receiver.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, SuggestionStatus::Canceled);
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn cancel_synthesizes_canceled_for_in_flight_sources() {
        let config = SuggestionConfig::default();
        let mux = build_mux(config);
        let slow = Arc::new(SlowSource::new(SourceIdentifier::new("pkg", "Slow"), Duration::from_secs(30)));
        let receiver = CollectingReceiver::new(1);

        mux.query("q", vec![SourceQuery { source: slow, is_web: false }], receiver.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        mux.cancel();

        tokio::time::timeout(Duration::from_secs(1), receiver.wait_for_all())
            .await
            .unwrap();

        let results = receiver.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, SuggestionStatus::Canceled);
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn queued_source_times_out_without_ever_starting() {
        let mut config = SuggestionConfig::default();
        config.per_source_concurrent_query_limit = 1;
        config.source_timeout = Duration::from_millis(20);
        let mux = build_mux(config);

        let occupier = Arc::new(SlowSource::new(SourceIdentifier::new("pkg", "Same"), Duration::from_secs(30)));
        let queued_source = Arc::new(SlowSource::new(SourceIdentifier::new("pkg", "Same"), Duration::from_secs(30)));
        let receiver = CollectingReceiver::new(2);

        mux.query("q", vec![SourceQuery { source: occupier, is_web: false }], receiver.clone());
        mux.query("q", vec![SourceQuery { source: queued_source, is_web: false }], receiver.clone());

        tokio::time::timeout(Duration::from_secs(1), receiver.wait_for_all())
            .await
            .unwrap();

        let results = receiver.results.lock().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == SuggestionStatus::Canceled));
    }
}
