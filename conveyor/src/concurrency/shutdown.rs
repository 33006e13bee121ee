//! Two-tier shutdown signalling.
//!
//! A [`ShutdownSignal`] moves through [`ShutdownState::Running`],
//! [`ShutdownState::GracefulRequested`], [`ShutdownState::ForcedRequested`] and finally
//! [`ShutdownState::Closed`]. A graceful close asks the owner to stop admitting new work and let
//! in-flight work finish, a forced close asks every blocking wait to give up immediately.
//!
//! The forced tier is a [`CancellationToken`] and the graceful tier is a child of it, so a forced
//! close is always observed as a graceful close too. Completion cancels the forced token as
//! well, which lets late waiters bail out once the owner is gone.

use std::fmt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle state published by a [`ShutdownSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    Running,
    GracefulRequested,
    ForcedRequested,
    Closed,
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownState::Running => "running",
            ShutdownState::GracefulRequested => "graceful_requested",
            ShutdownState::ForcedRequested => "forced_requested",
            ShutdownState::Closed => "closed",
        };

        f.write_str(name)
    }
}

/// Coordinates graceful and forced termination of a stage and everything it owns.
///
/// Cloning a [`ShutdownSignal`] yields another handle on the same state.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    close_now: CancellationToken,
    close_at_leisure: CancellationToken,
    closed: CancellationToken,
    state_tx: watch::Sender<ShutdownState>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let close_now = CancellationToken::new();
        let close_at_leisure = close_now.child_token();
        let (state_tx, _) = watch::channel(ShutdownState::Running);

        Self {
            close_now,
            close_at_leisure,
            closed: CancellationToken::new(),
            state_tx,
        }
    }

    /// Requests a graceful close.
    pub fn close_at_leisure(&self) {
        self.close_at_leisure.cancel();
        self.advance(ShutdownState::GracefulRequested);
    }

    /// Requests a forced close, which also implies a graceful one.
    pub fn close_now(&self) {
        self.close_now.cancel();
        self.advance(ShutdownState::ForcedRequested);
    }

    /// Marks the owner as fully closed. Later calls are no-ops.
    pub fn shutdown_complete(&self) {
        self.closed.cancel();
        self.close_now.cancel();
        self.advance(ShutdownState::Closed);
    }

    pub fn should_close_at_leisure(&self) -> bool {
        self.close_at_leisure.is_cancelled()
    }

    pub fn should_close_now(&self) -> bool {
        self.close_now.is_cancelled()
    }

    pub fn has_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn state(&self) -> ShutdownState {
        *self.state_tx.borrow()
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state_tx.subscribe()
    }

    /// Returns a token cancelled once a forced close is requested or the owner has closed.
    ///
    /// Every blocking operation that must not outlive a forced close takes this token.
    pub fn close_now_token(&self) -> CancellationToken {
        self.close_now.clone()
    }

    /// Resolves once a graceful (or forced) close is requested.
    pub async fn close_at_leisure_requested(&self) {
        self.close_at_leisure.cancelled().await
    }

    /// Resolves once a forced close is requested or the owner has closed.
    pub async fn close_now_requested(&self) {
        self.close_now.cancelled().await
    }

    /// Resolves once the owner has fully closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Moves the published state forward. States never move backwards.
    fn advance(&self, next: ShutdownState) {
        self.state_tx.send_if_modified(|state| {
            if next > *state {
                debug!(from = %state, to = %next, "shutdown state changed");
                *state = next;
                true
            } else {
                false
            }
        });
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
