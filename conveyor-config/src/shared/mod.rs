//! Shared configuration types for batching stages.

mod base;
mod batch;
mod batcher;

pub use base::ValidationError;
pub use batch::BatchPolicyConfig;
pub use batcher::BatcherConfig;
