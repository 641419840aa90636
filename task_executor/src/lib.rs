#![deny(warnings)]
#![deny(clippy::all)]
#![allow(
    clippy::new_without_default,
    clippy::new_ret_no_self,
    clippy::mutex_atomic
)]

//! A shared owner of the tokio `Runtime`(s) that the suggestion aggregator
//! runs on. Every subsystem that needs to spawn work (`PerTagExecutor`,
//! `DelayedExecutor`, `QueryMultiplexer`, `ShortcutRepository`) is handed an
//! `Executor` rather than reaching for a global runtime handle, so tests can
//! construct private runtimes and so the daemon can run query execution and
//! shortcut-refresh execution on differently-sized pools (spec §5).

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{JoinError, JoinHandle};

/// Executors come in two flavors:
/// * "borrowed" — created with [`Executor::new`], sharing a `Handle` owned by
///   someone else (usually a `#[tokio::main]`/`#[tokio::test]` runtime).
///   Dropping all clones has no effect on the underlying `Runtime`.
/// * "owned" — created with [`Executor::new_owned`]; when the last clone is
///   dropped (or [`Executor::shutdown`] is called explicitly) the `Runtime`
///   is shut down.
#[derive(Debug, Clone)]
pub struct Executor {
    runtime: Arc<Mutex<Option<Runtime>>>,
    handle: Handle,
}

impl Executor {
    /// Wraps the `Handle` of the ambient tokio runtime (e.g. inside a
    /// `#[tokio::test]`).
    pub fn new() -> Executor {
        Self {
            runtime: Arc::new(Mutex::new(None)),
            handle: Handle::current(),
        }
    }

    /// Builds and owns a fresh multi-threaded runtime with the given core
    /// worker-thread count and maximum blocking-thread count.
    pub fn new_owned(num_worker_threads: usize, max_threads: usize) -> Result<Executor, String> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(num_worker_threads)
            .max_blocking_threads(max_threads.saturating_sub(num_worker_threads).max(1))
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to start the runtime: {e}"))?;

        let handle = runtime.handle().clone();
        Ok(Executor {
            runtime: Arc::new(Mutex::new(Some(runtime))),
            handle,
        })
    }

    /// A clone of this Executor which is disconnected from shutdown events:
    /// dropping it will never shut down the underlying Runtime.
    pub fn to_borrowed(&self) -> Executor {
        Self {
            runtime: Arc::new(Mutex::new(None)),
            handle: self.handle.clone(),
        }
    }

    /// Run a Future on this Executor's Runtime as a new Task, recovering a
    /// panic/cancellation via `rescue_join_error` rather than propagating a
    /// `JoinError` to the caller.
    pub fn spawn<O, F>(
        &self,
        future: F,
        rescue_join_error: impl FnOnce(JoinError) -> O,
    ) -> impl Future<Output = O>
    where
        O: Send + 'static,
        F: Future<Output = O> + Send + 'static,
    {
        self.handle.spawn(future).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    /// Run a Future on this Executor's Runtime and return a raw `JoinHandle`.
    pub fn native_spawn<O, F>(&self, future: F) -> JoinHandle<O>
    where
        O: Send + 'static,
        F: Future<Output = O> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Spawn a blocking closure on the pool reserved for long-running,
    /// synchronous I/O (e.g. the shortcut repository's SQLite calls).
    pub fn spawn_blocking<F, R>(
        &self,
        f: F,
        rescue_join_error: impl FnOnce(JoinError) -> R,
    ) -> impl Future<Output = R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(f).map(|res| match res {
            Ok(r) => r,
            Err(e) => rescue_join_error(e),
        })
    }

    /// A reference to this executor's runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Blocking call to shut down the Runtime of an "owned" Executor. Leaked
    /// tasks after `timeout` are logged, not waited on further.
    pub fn shutdown(&self, timeout: Duration) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        let start = Instant::now();
        runtime.shutdown_timeout(timeout + Duration::from_millis(250));
        if start.elapsed() > timeout {
            log::warn!("Executor shutdown took unexpectedly long: tasks were likely leaked!");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.runtime.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::Executor;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_runs_on_borrowed_handle() {
        let executor = Executor::new();
        let result = executor.spawn(async { 1 + 1 }, |_| 0).await;
        assert_eq!(result, 2);
    }

    #[test]
    fn owned_executor_runs_blocking_work() {
        let executor = Executor::new_owned(1, 2).unwrap();
        let result = executor.handle().block_on(executor.spawn_blocking(
            || std::thread::sleep(Duration::from_millis(1)),
            |_| (),
        ));
        assert_eq!(result, ());
        executor.shutdown(Duration::from_secs(1));
        assert!(executor.is_shutdown());
    }
}
