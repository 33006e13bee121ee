//! Batch accumulation policy.
//!
//! [`policy::BatchPolicy`] collects records into a working batch and decides when it should be
//! flushed. It does no I/O and is owned by exactly one batching loop, so it needs no locking.

pub mod policy;
pub mod processor;
