use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

/// Upper bound on every wait performed by the test helpers.
///
/// Batching stages in tests react within milliseconds, so this only bounds broken tests.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Notification of a [`BatchCollector`](crate::test_utils::collector::BatchCollector)
/// condition, bounded by [`DEFAULT_NOTIFY_TIMEOUT`].
#[derive(Debug, Clone)]
pub struct TimedNotify {
    notify: Arc<Notify>,
}

impl TimedNotify {
    pub fn new(notify: Arc<Notify>) -> Self {
        Self { notify }
    }

    /// Waits for the notification.
    ///
    /// # Panics
    ///
    /// Panics if [`DEFAULT_NOTIFY_TIMEOUT`] elapses first.
    pub async fn notified(&self) {
        within_timeout(self.notify.notified()).await;
    }
}

/// Awaits `future`, panicking if it does not complete within [`DEFAULT_NOTIFY_TIMEOUT`].
pub async fn within_timeout<F>(future: F) -> F::Output
where
    F: Future,
{
    match timeout(DEFAULT_NOTIFY_TIMEOUT, future).await {
        Ok(output) => output,
        Err(_) => panic!("test future did not complete within {DEFAULT_NOTIFY_TIMEOUT:?}"),
    }
}
