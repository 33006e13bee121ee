use crate::types::{Batch, Record};

/// Predicate deciding whether an accumulated batch is ready to flush.
///
/// Closures of type `Fn(&[Record]) -> bool` implement this trait, which is how checks compiled
/// from a predicate language plug into a policy.
pub trait BatchCheck: Send + Sync {
    /// Returns `true` when `records`, the whole working batch, should be flushed.
    fn check(&self, records: &[Record]) -> bool;
}

impl<F> BatchCheck for F
where
    F: Fn(&[Record]) -> bool + Send + Sync,
{
    fn check(&self, records: &[Record]) -> bool {
        self(records)
    }
}

/// Transformation applied to every flushed batch before it leaves the policy.
///
/// Processors run in the order they were added. A processor may drop records; a batch emptied
/// this way is not delivered.
pub trait BatchProcessor: Send + Sync {
    fn process(&self, batch: Batch) -> Batch;
}

impl<F> BatchProcessor for F
where
    F: Fn(Batch) -> Batch + Send + Sync,
{
    fn process(&self, batch: Batch) -> Batch {
        self(batch)
    }
}
