use tokio_util::sync::CancellationToken;

use crate::bail;
use crate::error::{ConveyorResult, ErrorKind};
use crate::transaction::{AckResult, AckSink, Transaction};
use crate::types::Message;

/// An upstream transaction retained until the batch it contributed to is acknowledged.
///
/// Many tracked transactions usually share one outbound batch. When that batch resolves, each
/// of them receives its own copy of the result through [`TrackedTransaction::ack`].
#[derive(Debug)]
pub struct TrackedTransaction {
    payload: Message,
    ack: AckSink,
}

impl TrackedTransaction {
    pub fn new(transaction: Transaction) -> Self {
        let (payload, ack) = transaction.into_parts();
        Self { payload, ack }
    }

    /// Returns the message this transaction carried.
    pub fn message(&self) -> &Message {
        &self.payload
    }

    /// Forwards `result` to the original producer.
    ///
    /// Returns [`ErrorKind::AckForwardCancelled`] without delivering when `close_now` is already
    /// cancelled, and [`ErrorKind::AckReceiverDropped`] when the producer stopped waiting.
    /// Consuming `self` makes this the only forwarding attempt.
    pub fn ack(self, close_now: &CancellationToken, result: AckResult) -> ConveyorResult<()> {
        if close_now.is_cancelled() {
            bail!(
                ErrorKind::AckForwardCancelled,
                "Forced close interrupted forwarding an acknowledgment"
            );
        }

        self.ack.send(result)
    }
}
