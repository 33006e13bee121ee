//! Batching stages for streaming pipelines.
//!
//! A batching stage wraps an [`input::Input`], accumulates the records of its transactions
//! according to a [`batch::policy::BatchPolicy`] and forwards each batch downstream as a single
//! transaction. The result of that transaction is fanned back out to every upstream
//! transaction that contributed to the batch.
//!
//! Stages are started through [`workers::batcher::BatcherWorker`] and closed in two tiers: a
//! graceful close stops ingestion and lets in-flight batches resolve, a forced close abandons
//! everything still waiting.

pub mod batch;
pub mod concurrency;
pub mod error;
pub mod input;
mod macros;
pub mod metrics;
pub mod stage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transaction;
pub mod types;
pub mod workers;
