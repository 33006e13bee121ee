use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

use crate::bail;
use crate::error::{ConveyorError, ConveyorResult, ErrorKind};
use crate::types::Message;

/// Terminal result of a transaction: `Ok(())` on success, the failure otherwise.
pub type AckResult = Result<(), ConveyorError>;

/// Receiving end of a transaction's acknowledgment.
///
/// A [`oneshot::error::RecvError`] means the sink was dropped without a result, which must be
/// treated as a delivery failure.
pub type AckRx = oneshot::Receiver<AckResult>;

/// Sending half of a transaction channel.
pub type TransactionTx = mpsc::Sender<Transaction>;

/// Single-use sink accepting exactly one [`AckResult`].
///
/// [`AckSink::send`] consumes the sink, so a second result cannot be delivered. Dropping the
/// sink without sending closes the paired [`AckRx`].
#[derive(Debug)]
pub struct AckSink {
    tx: oneshot::Sender<AckResult>,
}

impl AckSink {
    /// Creates a sink and the receiver observing it.
    pub fn new() -> (AckSink, AckRx) {
        let (tx, rx) = oneshot::channel();
        (AckSink { tx }, rx)
    }

    /// Delivers `result` to the producer.
    ///
    /// Fails with [`ErrorKind::AckReceiverDropped`] when the producer no longer waits for it.
    pub fn send(self, result: AckResult) -> ConveyorResult<()> {
        if self.tx.send(result).is_err() {
            bail!(
                ErrorKind::AckReceiverDropped,
                "Producer stopped waiting for the acknowledgment"
            );
        }

        Ok(())
    }
}

/// A message paired with the sink its result must be delivered to.
#[derive(Debug)]
pub struct Transaction {
    payload: Message,
    ack: AckSink,
}

impl Transaction {
    /// Creates a transaction carrying `payload` and returns the receiver of its result.
    pub fn new(payload: impl Into<Message>) -> (Transaction, AckRx) {
        let (ack, ack_rx) = AckSink::new();

        let transaction = Transaction {
            payload: payload.into(),
            ack,
        };

        (transaction, ack_rx)
    }

    pub fn payload(&self) -> &Message {
        &self.payload
    }

    /// Acknowledges the transaction, dropping its payload.
    pub fn ack(self, result: AckResult) -> ConveyorResult<()> {
        self.ack.send(result)
    }

    pub fn into_parts(self) -> (Message, AckSink) {
        (self.payload, self.ack)
    }
}

/// Creates a bounded transaction channel.
pub fn create_transaction_channel(capacity: usize) -> (TransactionTx, TransactionRx) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, TransactionRx { rx })
}

/// Readable stream of transactions produced by an input.
///
/// The stream ends once every sender is dropped, which is how an input signals that it will
/// not produce anything else.
#[derive(Debug)]
pub struct TransactionRx {
    rx: mpsc::Receiver<Transaction>,
}

impl TransactionRx {
    /// Receives the next transaction, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Transaction> {
        self.rx.recv().await
    }

    /// Stops accepting new transactions while keeping the buffered ones readable.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for TransactionRx {
    type Item = Transaction;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
