//! The batching loop and the tasks it spawns.
//!
//! A stage is driven by a single task running [`batching::BatchingLoop`], which owns the
//! accumulator and the pending fan-in set. Every batch successfully handed downstream detaches
//! its contributors into an ack-forwarding task from [`acks`].

pub mod acks;
pub mod batching;

use std::fmt;

/// Lifecycle of a batching stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageState {
    /// Reading upstream transactions and flushing on triggers.
    Running,
    /// Upstream is exhausted and a pending period is being honoured.
    Draining,
    /// Final flush, ack resolution and upstream close are in progress.
    Flushing,
    Closed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Running => "running",
            StageState::Draining => "draining",
            StageState::Flushing => "flushing",
            StageState::Closed => "closed",
        };

        f.write_str(name)
    }
}

/// What made a batch ready to flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// A count, byte size or check trigger of the policy.
    Policy,
    /// The period elapsed.
    Period,
    /// Residual records flushed while the stage shuts down.
    Final,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Policy => "policy",
            FlushTrigger::Period => "period",
            FlushTrigger::Final => "final",
        }
    }
}
