//! Data carried through batching stages.

mod record;
mod sized;

pub use record::*;
pub use sized::*;
