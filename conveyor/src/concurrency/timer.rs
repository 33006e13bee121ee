//! Re-armable deadline used by the batching loop.
//!
//! [`Deadline`] is inert until armed and stays pending while inert, so it can sit in a
//! `tokio::select!` branch unconditionally. It disarms itself when it fires, which makes the
//! next loop iteration compute a fresh deadline.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep};

/// A one-shot timer that can be armed, disarmed and re-armed.
///
/// The inner [`Sleep`] is boxed so that [`Deadline`] is `Unpin` and can be polled by reference
/// from `select!`.
#[derive(Debug, Default)]
pub struct Deadline {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Deadline {
    /// Creates a disarmed deadline.
    pub fn new() -> Self {
        Self { sleep: None }
    }

    /// Arms the deadline to fire after `duration`, replacing any armed one.
    pub fn arm(&mut self, duration: Duration) {
        self.sleep = Some(Box::pin(sleep(duration)));
    }

    pub fn disarm(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Returns the instant the deadline fires at, if armed.
    pub fn fires_at(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }
}

impl Future for Deadline {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let Some(sleep) = this.sleep.as_mut() else {
            return Poll::Pending;
        };

        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        Poll::Ready(())
    }
}
