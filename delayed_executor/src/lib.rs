#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! Posts runnables at a future monotonic time, with cooperative
//! single-threaded semantics: posted runnables are executed serially in one
//! event context and are never run concurrently with one another (spec
//! §4.2). Used both for per-source timeouts and for throttling the cursor's
//! change notifications.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use task_executor::Executor;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub type Runnable = Pin<Box<dyn Future<Output = ()> + Send>>;

struct ScheduledRunnable {
    at: Instant,
    seq: u64,
    runnable: Runnable,
}

impl PartialEq for ScheduledRunnable {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for ScheduledRunnable {}
impl PartialOrd for ScheduledRunnable {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledRunnable {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want the earliest `at` (and, on ties,
        // the earliest submission) on top, so compare in reverse.
        other.at.cmp(&self.at).then(other.seq.cmp(&self.seq))
    }
}

/// A handle that posts runnables onto a single serialized event loop.
#[derive(Clone)]
pub struct DelayedExecutor {
    sender: mpsc::UnboundedSender<ScheduledRunnable>,
}

impl DelayedExecutor {
    pub fn new(executor: &Executor) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        executor.native_spawn(Self::run_loop(receiver));
        Self { sender }
    }

    /// Post `runnable` to execute after `delay` has elapsed.
    pub fn post_delayed(&self, runnable: Runnable, delay: Duration) {
        self.post_at_time(runnable, Instant::now() + delay);
    }

    /// Post `runnable` to execute at the given absolute monotonic instant.
    pub fn post_at_time(&self, runnable: Runnable, at: Instant) {
        static NEXT_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = NEXT_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if self
            .sender
            .send(ScheduledRunnable { at, seq, runnable })
            .is_err()
        {
            log::warn!("delayed_executor: event loop has shut down, dropping scheduled runnable");
        }
    }

    async fn run_loop(mut incoming: mpsc::UnboundedReceiver<ScheduledRunnable>) {
        let mut heap: BinaryHeap<ScheduledRunnable> = BinaryHeap::new();

        loop {
            let sleep = match heap.peek() {
                Some(next) => tokio::time::sleep_until(next.at),
                None => tokio::time::sleep(Duration::from_secs(3600)),
            };
            tokio::pin!(sleep);

            tokio::select! {
                biased;

                () = &mut sleep, if heap.peek().is_some() => {
                    let due = heap.pop().expect("heap peeked as non-empty above");
                    due.runnable.await;
                }

                maybe_scheduled = incoming.recv() => {
                    match maybe_scheduled {
                        Some(scheduled) => heap.push(scheduled),
                        None => {
                            // All senders dropped: run anything still pending
                            // and then exit the event context.
                            let mut remaining: Vec<_> = heap.into_sorted_vec();
                            remaining.reverse();
                            for due in remaining {
                                due.runnable.await;
                            }
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DelayedExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use task_executor::Executor;

    #[tokio::test(start_paused = true)]
    async fn runs_in_delay_order_not_submission_order() {
        let delayed = DelayedExecutor::new(&Executor::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let order2 = order.clone();
        delayed.post_delayed(
            Box::pin(async move { order2.lock().await.push("late") }),
            Duration::from_millis(50),
        );
        let order3 = order.clone();
        delayed.post_delayed(
            Box::pin(async move { order3.lock().await.push("early") }),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(*order.lock().await, vec!["early", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn runnables_never_overlap() {
        let delayed = DelayedExecutor::new(&Executor::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            delayed.post_delayed(
                Box::pin(async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                }),
                Duration::from_millis(1),
            );
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
