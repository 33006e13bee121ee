use std::future::Future;
use std::time::Duration;

use crate::error::ConveyorResult;
use crate::transaction::TransactionRx;

/// Trait for components producing a stream of transactions.
///
/// [`Input`] is both what a batching stage consumes and what it exposes, so stages can be
/// chained. Every transaction read from [`Input::take_transactions`] must eventually be
/// acknowledged, or dropped to signal a delivery failure to its producer.
///
/// Closing is split in two: [`Input::close_async`] requests a graceful close and returns
/// immediately, while [`Input::wait_for_close`] blocks until the input is fully closed.
pub trait Input: Send + Sync + 'static {
    /// Returns `true` while the input is connected to its source.
    fn connected(&self) -> bool;

    /// Hands out the stream of transactions produced by this input.
    ///
    /// The stream can only be taken once; later calls return `None`.
    fn take_transactions(&mut self) -> Option<TransactionRx>;

    /// Requests a graceful close without waiting for it.
    fn close_async(&self);

    /// Waits until the input is fully closed.
    ///
    /// A zero `timeout` asks the input to give up on anything still in flight and close
    /// immediately. Returns [`crate::error::ErrorKind::ShutdownTimeout`] if the input is still
    /// open once `timeout` elapsed.
    fn wait_for_close(&self, timeout: Duration) -> impl Future<Output = ConveyorResult<()>> + Send;
}
