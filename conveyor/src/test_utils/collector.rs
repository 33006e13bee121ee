use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ConveyorError;
use crate::test_utils::notify::TimedNotify;
use crate::transaction::{AckResult, Transaction, TransactionRx};
use crate::types::Batch;

/// How a [`BatchCollector`] acknowledges the batches it receives.
#[derive(Debug, Clone)]
pub enum AckMode {
    /// Acknowledges every batch successfully on receipt.
    Ack,
    /// Rejects every batch with the given error on receipt.
    Reject(ConveyorError),
    /// Keeps batches unacknowledged until [`BatchCollector::ack_held`] is called.
    Hold,
    /// Drops batches without acknowledging them.
    Drop,
}

type BatchCondition = Box<dyn Fn(&[Batch]) -> bool + Send + Sync>;

struct Inner {
    mode: AckMode,
    batches: Vec<Batch>,
    held: Vec<Transaction>,
    ended: bool,
    conditions: Vec<(BatchCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let batches = &self.batches;
        self.conditions.retain(|(condition, notify)| {
            let satisfied = condition(batches);
            if satisfied {
                notify.notify_one();
            }

            !satisfied
        });
    }
}

/// Downstream consumer recording every batch a stage emits.
///
/// The collector reads the stage's output on a background task until the stream ends.
pub struct BatchCollector {
    inner: Arc<RwLock<Inner>>,
    ended: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl BatchCollector {
    pub fn spawn(mut transactions: TransactionRx, mode: AckMode) -> Self {
        let inner = Arc::new(RwLock::new(Inner {
            mode,
            batches: Vec::new(),
            held: Vec::new(),
            ended: false,
            conditions: Vec::new(),
        }));
        let ended = Arc::new(Notify::new());

        let handle = tokio::spawn({
            let inner = inner.clone();
            let ended = ended.clone();

            async move {
                while let Some(transaction) = transactions.recv().await {
                    let mut inner = inner.write().await;
                    inner.batches.push(transaction.payload().clone());

                    debug!(
                        batch = ?transaction.payload().payload_strings(),
                        mode = ?inner.mode,
                        "collector received batch"
                    );

                    match inner.mode.clone() {
                        AckMode::Ack => {
                            let _ = transaction.ack(Ok(()));
                        }
                        AckMode::Reject(err) => {
                            let _ = transaction.ack(Err(err));
                        }
                        AckMode::Hold => inner.held.push(transaction),
                        AckMode::Drop => drop(transaction),
                    }

                    inner.check_conditions();
                }

                inner.write().await.ended = true;
                ended.notify_one();
            }
        });

        Self {
            inner,
            ended,
            handle,
        }
    }

    /// Returns every batch received so far, in order.
    pub async fn batches(&self) -> Vec<Batch> {
        self.inner.read().await.batches.clone()
    }

    /// Returns the payloads of every batch received so far.
    pub async fn payloads(&self) -> Vec<Vec<String>> {
        self.inner
            .read()
            .await
            .batches
            .iter()
            .map(|batch| batch.payload_strings())
            .collect()
    }

    /// Returns the number of held batches not yet acknowledged.
    pub async fn held_count(&self) -> usize {
        self.inner.read().await.held.len()
    }

    /// Acknowledges every held batch with `result` and returns how many were acknowledged.
    pub async fn ack_held(&self, result: AckResult) -> usize {
        let held = std::mem::take(&mut self.inner.write().await.held);
        let count = held.len();

        for transaction in held {
            let _ = transaction.ack(result.clone());
        }

        count
    }

    /// Returns a notification fired once at least `count` batches were received.
    pub async fn wait_for_batches(&self, count: usize) -> TimedNotify {
        self.wait_for(move |batches| batches.len() >= count).await
    }

    /// Returns a notification fired once `condition` holds for the received batches.
    pub async fn wait_for<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[Batch]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner
            .conditions
            .push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        TimedNotify::new(notify)
    }

    /// Returns `true` once the stage's output stream ended.
    pub async fn has_ended(&self) -> bool {
        self.inner.read().await.ended
    }

    /// Waits for the stage's output stream to end.
    pub async fn wait_for_end(&self) {
        if self.has_ended().await {
            return;
        }

        TimedNotify::new(self.ended.clone()).notified().await;
    }

    /// Stops reading the stage's output, dropping the stream and any held batch.
    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
        self.inner.write().await.held.clear();
    }
}
