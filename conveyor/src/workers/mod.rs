//! Background workers running batching stages.

pub mod base;
pub mod batcher;
