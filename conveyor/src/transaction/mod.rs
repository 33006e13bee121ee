//! Transactions: payloads paired with a single-use acknowledgment sink.

mod base;
mod tracked;

pub use base::*;
pub use tracked::*;
