use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct PendingAcksInner {
    count: AtomicUsize,
    idle: Notify,
}

/// Counts ack-forwarding tasks that are still running.
///
/// Each task holds a [`PendingAckGuard`] for its whole lifetime; the count is incremented when
/// the guard is created and decremented when it is dropped, so a panicking task is still
/// accounted for. [`PendingAcks::wait_idle`] blocks until the count reaches zero.
#[derive(Debug, Clone, Default)]
pub struct PendingAcks {
    inner: Arc<PendingAcksInner>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one outstanding task and returns the guard releasing it.
    pub fn track(&self) -> PendingAckGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);

        PendingAckGuard {
            inner: self.inner.clone(),
        }
    }

    /// Returns the number of outstanding tasks.
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Waits until no task is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register interest before checking the count so a release in between is not lost.
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// RAII guard releasing one outstanding task of a [`PendingAcks`] on drop.
#[derive(Debug)]
pub struct PendingAckGuard {
    inner: Arc<PendingAcksInner>,
}

impl Drop for PendingAckGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_idle_returns_immediately_without_tasks() {
        let pending = PendingAcks::new();

        tokio::time::timeout(Duration::from_secs(1), pending.wait_idle())
            .await
            .expect("no outstanding tasks");
    }

    #[tokio::test]
    async fn guards_track_outstanding_tasks() {
        let pending = PendingAcks::new();

        let first = pending.track();
        let second = pending.track();
        assert_eq!(pending.count(), 2);

        drop(first);
        assert_eq!(pending.count(), 1);

        drop(second);
        assert_eq!(pending.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_blocks_until_last_guard_drops() {
        let pending = PendingAcks::new();
        let guard = pending.track();

        let waiter = tokio::spawn({
            let pending = pending.clone();
            async move { pending.wait_idle().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(guard);
        });

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released after last guard")
            .unwrap();
    }
}
