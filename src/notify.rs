//! The refresh notifier: a single-shot latch fired whenever a
//! [`crate::wrapper::StreamWrapper`] has caught up to the stream tail.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// A one-shot broadcast latch, grounded on [`tokio::sync::Notify`]: its
/// `notify_waiters()` wakes only currently-registered waiters,
/// asynchronously via the runtime -- exactly "complete the latch, discard
/// it, run awaiters asynchronously, not inline" -- so no custom latch
/// primitive is needed.
#[derive(Debug, Default)]
pub struct RefreshNotifier {
    notify: Notify,
    waiting: AtomicUsize,
}

impl RefreshNotifier {
    /// Creates a notifier with no pending waiters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest and waits for the next
    /// [`notify`](RefreshNotifier::notify) call. Multiple concurrent callers
    /// are all released by the same notification.
    pub async fn wait(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.notify.notified().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }

    /// Releases every caller currently parked in
    /// [`wait`](RefreshNotifier::wait).
    pub fn notify(&self) {
        self.notify.notify_waiters();
    }

    /// Whether at least one caller is currently parked in
    /// [`wait`](RefreshNotifier::wait).
    pub fn waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst) > 0
    }
}
