//! C7 — the task group tracking in-flight workers and the process-wide stop
//! signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Returned by [`TaskGroup::register`] when the group is already stopping.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("task group is stopping, refusing new work")]
pub struct GroupStopping;

/// Tracks every outstanding scan/benchmark worker and the shutdown signal
/// they all race against.
///
/// `close()` is idempotent: calling it twice has the same effect as once.
pub struct TaskGroup {
    cancel: CancellationToken,
    stopping: AtomicBool,
    count: Mutex<usize>,
    idle: Notify,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            stopping: AtomicBool::new(false),
            count: Mutex::new(0),
            idle: Notify::new(),
        }
    }

    /// A clone of the group's cancellation token, to be raced against
    /// blocking operations by workers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Registers a new worker against a shared handle. Takes `&Arc<Self>`
    /// rather than `&self` so the returned guard owns a clone and can be
    /// moved into a spawned (`'static`) task. Fails if the group is already
    /// stopping, in which case the caller must return without mutating any
    /// queues or counters.
    pub fn register(group: &Arc<TaskGroup>) -> Result<TaskGuard, GroupStopping> {
        if group.is_stopping() {
            return Err(GroupStopping);
        }
        let mut count = group.count.lock().unwrap();
        *count += 1;
        Ok(TaskGuard { group: group.clone() })
    }

    fn deregister(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Cancels the token and blocks until every registered worker has
    /// deregistered.
    pub async fn close(&self) {
        self.stopping.store(true, Ordering::Release);
        self.cancel.cancel();
        loop {
            let notified = self.idle.notified();
            if *self.count.lock().unwrap() == 0 {
                break;
            }
            notified.await;
        }
    }
}

/// RAII registration handle. Owns a clone of the group's `Arc` so it can be
/// moved into a spawned task. Deregistering happens on drop, so it happens
/// on every exit path — normal return, early return, or panic unwind.
pub struct TaskGuard {
    group: Arc<TaskGroup>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.group.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn close_waits_for_workers_to_drain() {
        let group = Arc::new(TaskGroup::new());
        let guard = TaskGroup::register(&group).unwrap();

        let group2 = group.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
            let _ = group2.cancellation_token();
        });

        group.close().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn registration_refused_after_close_starts() {
        let group = Arc::new(TaskGroup::new());
        let closer = {
            let group = group.clone();
            tokio::spawn(async move { group.close().await })
        };
        // give close() a chance to flip the stopping flag
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(TaskGroup::register(&group).is_err());
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let group = TaskGroup::new();
        group.close().await;
        group.close().await;
    }
}
