//! Cancellation scope for background subscriptions.
//!
//! Every forwarding task a component spawns goes through its [`TaskScope`].
//! [`shutdown`](TaskScope::shutdown) fires one signal that ends all of them
//! at once, so teardown never leaves half the graph subscribed.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// Owner of a set of cancellable background tasks.
#[derive(Debug)]
pub struct TaskScope {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScope {
    /// Create an open scope.
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `fut` so that it ends when the scope shuts down.
    ///
    /// Must be called from within a Tokio runtime. Returns `None` without
    /// spawning once the scope has been shut down. The returned handle
    /// cancels just this task.
    pub fn spawn_cancellable<F>(&self, fut: F) -> Option<AbortHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.lock();
        if self.is_shutdown() {
            return None;
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stop| *stop) => {}
                () = fut => {}
            }
        });
        let abort = handle.abort_handle();

        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Some(abort)
    }

    /// Cancel every task in the scope. Later calls do nothing.
    pub fn shutdown(&self) {
        let mut handles = self.lock();
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        let count = handles.len();
        for handle in handles.drain(..) {
            handle.abort();
        }
        debug!(tasks = count, "Task scope shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.lock().iter().filter(|h| !h.is_finished()).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_pending_tasks() {
        let scope = TaskScope::new();
        let (tx, rx) = oneshot::channel::<()>();
        scope.spawn_cancellable(async move {
            std::future::pending::<()>().await;
            drop(tx);
        });

        assert_eq!(scope.active_tasks(), 1);
        scope.shutdown();
        // The sender is dropped when the task is cancelled.
        assert!(rx.await.is_err());
        assert!(scope.is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_spawns_after_shutdown() {
        let scope = TaskScope::new();
        scope.shutdown();
        scope.shutdown();
        assert!(scope.spawn_cancellable(async {}).is_none());
        assert_eq!(scope.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_task_can_be_cancelled_alone() {
        let scope = TaskScope::new();
        let first = scope
            .spawn_cancellable(std::future::pending::<()>())
            .unwrap();
        scope.spawn_cancellable(std::future::pending::<()>());

        first.abort();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(first.is_finished());
        assert_eq!(scope.active_tasks(), 1);
    }
}
