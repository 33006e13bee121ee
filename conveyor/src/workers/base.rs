use std::future::Future;

use crate::error::ConveyorResult;

/// Trait for components that run in the background once started.
///
/// The generic parameter `H` is the handle returned by [`Worker::start`] and `S` is the state
/// observable through it.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type returned when startup fails.
    type Error;

    /// Starts the worker and returns a handle to it without waiting for it to finish.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle on a running worker.
///
/// The handle stays usable after the worker finished, so its final state can still be read.
pub trait WorkerHandle<S> {
    /// Returns a snapshot of the worker's current state.
    fn state(&self) -> S;

    /// Waits for the worker to finish and returns how it ended. Consumes the handle.
    fn wait(self) -> impl Future<Output = ConveyorResult<()>> + Send;
}
