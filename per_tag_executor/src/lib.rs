#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default, clippy::mutex_atomic)]

//! Bounds concurrency per opaque tag, with one queued pending run retained
//! per tag (spec §4.1).
//!
//! At most `concurrency_limit` runnables submitted under the same tag may be
//! concurrently executing. A submission while the tag is at its cap does not
//! run immediately; instead exactly one pending runnable is retained per tag,
//! and a newer submission silently overwrites (drops) an existing pending
//! one. When a running task for a tag finishes, a pending runnable for that
//! tag (if any) is submitted to the pool.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use task_executor::Executor;

pub type Runnable = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct TagState {
    running: usize,
    pending: Option<Runnable>,
}

struct Inner {
    executor: Executor,
    concurrency_limit: usize,
    tags: Mutex<HashMap<String, TagState>>,
}

/// Runs runnables on an underlying worker pool, subject to a per-tag
/// concurrency cap. Typically the tag is a source identifier's canonical
/// string form, so that each suggestion source gets its own independent cap.
#[derive(Clone)]
pub struct PerTagExecutor {
    inner: Arc<Inner>,
}

impl PerTagExecutor {
    pub fn new(executor: Executor, concurrency_limit: usize) -> Self {
        assert!(concurrency_limit > 0, "concurrency_limit must be positive");
        Self {
            inner: Arc::new(Inner {
                executor,
                concurrency_limit,
                tags: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submits `runnable` under `tag`. Returns `true` iff the submission was
    /// queued as the tag's pending slot rather than dispatched immediately.
    pub fn execute(&self, tag: impl Into<String>, runnable: Runnable) -> bool {
        let tag = tag.into();
        let mut tags = self.inner.tags.lock();
        let state = tags.entry(tag.clone()).or_default();

        if state.running < self.inner.concurrency_limit {
            state.running += 1;
            drop(tags);
            self.spawn(tag, runnable);
            false
        } else {
            if state.pending.is_some() {
                log::trace!("per_tag_executor: dropping superseded pending run for tag {tag}");
            }
            state.pending = Some(runnable);
            true
        }
    }

    /// The number of runnables currently executing for `tag`.
    pub fn running_count(&self, tag: &str) -> usize {
        self.inner
            .tags
            .lock()
            .get(tag)
            .map(|s| s.running)
            .unwrap_or(0)
    }

    fn spawn(&self, tag: String, runnable: Runnable) {
        let this = self.clone();
        self.inner.executor.native_spawn(async move {
            runnable.await;
            this.on_finished(tag);
        });
    }

    fn on_finished(&self, tag: String) {
        let next = {
            let mut tags = self.inner.tags.lock();
            let Some(state) = tags.get_mut(&tag) else {
                return;
            };
            state.running = state.running.saturating_sub(1);
            let next = state.pending.take();
            if next.is_some() {
                state.running += 1;
            }
            next
        };
        if let Some(runnable) = next {
            self.spawn(tag, runnable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PerTagExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use task_executor::Executor;
    use tokio::sync::{mpsc, Notify};

    fn boxed(
        fut: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> super::Runnable {
        Box::pin(fut)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn caps_concurrency_per_tag() {
        let per_tag = PerTagExecutor::new(Executor::new(), 2);
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        for _ in 0..2 {
            let running = running.clone();
            let max_seen = max_seen.clone();
            let release = release.clone();
            per_tag.execute(
                "source-a",
                boxed(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    release.notified().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }),
            );
        }

        // A third submission must queue, not run immediately.
        let third_ran = Arc::new(AtomicUsize::new(0));
        let third_ran2 = third_ran.clone();
        let queued = per_tag.execute("source-a", boxed(async move {
            third_ran2.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(queued, "third submission over the cap should be queued");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
        assert_eq!(third_ran.load(Ordering::SeqCst), 0);

        release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(third_ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_the_latest_pending_submission_survives() {
        let per_tag = PerTagExecutor::new(Executor::new(), 1);
        let release = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            let release = release.clone();
            per_tag.execute(
                "source-a",
                boxed(async move {
                    release.notified().await;
                }),
            );
        }

        // Two submissions arrive while the tag is occupied; only the second
        // (the latest) should ever run.
        let tx1 = tx.clone();
        per_tag.execute("source-a", boxed(async move { tx1.send(1).unwrap() }));
        let tx2 = tx.clone();
        per_tag.execute("source-a", boxed(async move { tx2.send(2).unwrap() }));

        release.notify_waiters();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, 2, "the middle (first-queued) submission must be dropped");

        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err(),
            "no second value should ever arrive"
        );
    }
}
