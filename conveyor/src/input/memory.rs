use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ConveyorResult, ErrorKind};
use crate::input::Input;
use crate::transaction::{
    AckRx, Transaction, TransactionRx, TransactionTx, create_transaction_channel,
};
use crate::types::Message;

#[derive(Debug)]
struct Inner {
    tx: Mutex<Option<TransactionTx>>,
    closed: CancellationToken,
    hold_close: bool,
    close_requests: AtomicUsize,
    wait_timeouts: Mutex<Vec<Duration>>,
}

impl Inner {
    fn lock_tx(&self) -> MutexGuard<'_, Option<TransactionTx>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_wait_timeouts(&self) -> MutexGuard<'_, Vec<Duration>> {
        self.wait_timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory input backed by a bounded transaction channel.
///
/// [`MemoryInput`] is what a batching stage reads from in tests and local development. Records
/// are pushed through the paired [`MemoryInputHandle`], which also exposes what the consumer did
/// with the input's lifecycle: how many close requests it received and which timeouts it was
/// waited on with.
///
/// ```rust,no_run
/// use conveyor::input::memory::MemoryInput;
/// use conveyor::types::{Message, Record};
///
/// # async fn example() -> conveyor::error::ConveyorResult<()> {
/// let (input, handle) = MemoryInput::new(16);
///
/// let ack_rx = handle.send(Message::single(Record::new("hello"))).await?;
/// handle.finish();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryInput {
    inner: Arc<Inner>,
    transactions: Option<TransactionRx>,
}

impl MemoryInput {
    /// Creates an input buffering up to `capacity` transactions.
    pub fn new(capacity: usize) -> (MemoryInput, MemoryInputHandle) {
        Self::build(capacity, false)
    }

    /// Creates an input that ignores graceful close requests.
    ///
    /// The input only reports itself closed once [`Input::wait_for_close`] is called with a zero
    /// timeout, which is how a stuck source looks to the stage consuming it.
    pub fn holding_close(capacity: usize) -> (MemoryInput, MemoryInputHandle) {
        Self::build(capacity, true)
    }

    fn build(capacity: usize, hold_close: bool) -> (MemoryInput, MemoryInputHandle) {
        let (tx, rx) = create_transaction_channel(capacity);
        let inner = Arc::new(Inner {
            tx: Mutex::new(Some(tx)),
            closed: CancellationToken::new(),
            hold_close,
            close_requests: AtomicUsize::new(0),
            wait_timeouts: Mutex::new(Vec::new()),
        });

        let input = MemoryInput {
            inner: inner.clone(),
            transactions: Some(rx),
        };

        (input, MemoryInputHandle { inner })
    }
}

impl Input for MemoryInput {
    fn connected(&self) -> bool {
        !self.inner.closed.is_cancelled()
    }

    fn take_transactions(&mut self) -> Option<TransactionRx> {
        self.transactions.take()
    }

    fn close_async(&self) {
        self.inner.close_requests.fetch_add(1, Ordering::AcqRel);

        // Dropping the sender ends the stream once buffered transactions are read.
        self.inner.lock_tx().take();

        if !self.inner.hold_close {
            self.inner.closed.cancel();
        }

        debug!(hold_close = self.inner.hold_close, "memory input close requested");
    }

    async fn wait_for_close(&self, timeout: Duration) -> ConveyorResult<()> {
        self.inner.lock_wait_timeouts().push(timeout);

        if timeout.is_zero() {
            self.inner.lock_tx().take();
            self.inner.closed.cancel();
        }

        if tokio::time::timeout(timeout, self.inner.closed.cancelled())
            .await
            .is_err()
        {
            bail!(
                ErrorKind::ShutdownTimeout,
                "Memory input did not close in time",
                format!("waited for {timeout:?}")
            );
        }

        info!("memory input closed");

        Ok(())
    }
}

/// Producer side of a [`MemoryInput`].
#[derive(Debug, Clone)]
pub struct MemoryInputHandle {
    inner: Arc<Inner>,
}

impl MemoryInputHandle {
    /// Sends `payload` as one transaction and returns the receiver of its result.
    ///
    /// Waits while the input's buffer is full. Fails with [`ErrorKind::InvalidState`] once the
    /// input was closed or finished.
    pub async fn send(&self, payload: impl Into<Message>) -> ConveyorResult<AckRx> {
        let tx = self.inner.lock_tx().clone();
        let Some(tx) = tx else {
            bail!(ErrorKind::InvalidState, "Memory input no longer accepts transactions");
        };

        let (transaction, ack_rx) = Transaction::new(payload);
        if tx.send(transaction).await.is_err() {
            bail!(
                ErrorKind::InvalidState,
                "Memory input stream was dropped by its consumer"
            );
        }

        Ok(ack_rx)
    }

    /// Ends the transaction stream as if the source had been exhausted.
    pub fn finish(&self) {
        self.inner.lock_tx().take();
    }

    /// Returns `true` once the input reported itself closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Returns how many times [`Input::close_async`] was called.
    pub fn close_requests(&self) -> usize {
        self.inner.close_requests.load(Ordering::Acquire)
    }

    /// Returns the timeouts [`Input::wait_for_close`] was called with, in call order.
    pub fn wait_timeouts(&self) -> Vec<Duration> {
        self.inner.lock_wait_timeouts().clone()
    }
}
