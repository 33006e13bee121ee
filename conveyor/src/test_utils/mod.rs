//! Utilities for testing batching stages.
//!
//! - [`input`] builds stages over a [`crate::input::memory::MemoryInput`] and pushes records
//!   through them.
//! - [`collector`] plays the downstream consumer: it drains a stage's output, records every
//!   batch and acknowledges it according to an [`collector::AckMode`].
//! - [`notify`] provides [`notify::TimedNotify`], a notification that fails the test instead of
//!   hanging when the awaited condition never happens.

pub mod collector;
pub mod input;
pub mod notify;
