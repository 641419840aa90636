#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// A simple condition that can be triggered once to release any tasks that
/// are waiting for it.
///
/// Roughly equivalent to a `CountDownLatch` with a count of 1, or Python's
/// `threading.Event` without the ability to clear it once triggered. Used by
/// `SuggestionSession` and `Cursor` to propagate `close()`/cancellation to
/// everything spawned for a query (spec §5, "Cancellation").
#[derive(Clone)]
pub struct AsyncLatch {
    sender: Arc<Mutex<Option<watch::Sender<()>>>>,
    receiver: watch::Receiver<()>,
}

impl AsyncLatch {
    pub fn new() -> AsyncLatch {
        let (sender, receiver) = watch::channel(());
        AsyncLatch {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Trigger the latch, releasing all waiters. Idempotent: calls after the
    /// first are no-ops.
    pub fn trigger(&self) {
        self.sender.lock().take();
    }

    /// Waits for another task to trigger this latch.
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        while receiver.changed().await.is_ok() {}
    }

    pub fn poll_triggered(&self) -> bool {
        self.sender.lock().is_none()
    }
}
