//! Concurrency primitives used by batching stages.
//!
//! - [`shutdown`] provides the two-tier [`shutdown::ShutdownSignal`]: a graceful tier asking a
//!   stage to stop admitting work and a forced tier aborting every blocking wait.
//! - [`timer`] provides the re-armable [`timer::Deadline`] driving period-based flushes.
//! - [`pending`] counts ack-forwarding tasks so a stage can wait for all of them before it
//!   reports itself closed.
//!
//! The batching loop owns its accumulator exclusively; the pending counter is the only state
//! shared between tasks.

pub mod pending;
pub mod shutdown;
pub mod timer;
