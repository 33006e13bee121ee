use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::batch::policy::BatchPolicy;
use crate::concurrency::pending::PendingAcks;
use crate::concurrency::shutdown::ShutdownSignal;
use crate::concurrency::timer::Deadline;
use crate::error::{ConveyorResult, ErrorKind};
use crate::{bail, conveyor_error};
use crate::input::Input;
use crate::metrics::{
    CONVEYOR_BATCH_SIZE_RECORDS, CONVEYOR_BATCHES_FLUSHED_TOTAL, CONVEYOR_RECORDS_BATCHED_TOTAL,
    STAGE_LABEL, TRIGGER_LABEL,
};
use crate::stage::acks::{AckForwarder, forward_result};
use crate::stage::{FlushTrigger, StageState};
use crate::transaction::{TrackedTransaction, Transaction, TransactionRx, TransactionTx};

/// Why the ingestion phase stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestEnd {
    CloseRequested,
    UpstreamExhausted,
}

/// Event observed by one iteration of the ingestion loop.
#[derive(Debug)]
enum LoopEvent {
    CloseRequested,
    DeadlineElapsed,
    Transaction(Transaction),
    UpstreamExhausted,
}

/// Result of handing a batch to the downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Sent,
    Empty,
    DownstreamClosed,
}

/// The control loop of a batching stage.
///
/// The loop owns the accumulator, the upstream stream and the fan-in set of contributors
/// waiting for the next flush. It is the only writer of both and never shares them.
pub struct BatchingLoop<I> {
    stage: String,
    input: Arc<I>,
    policy: BatchPolicy,
    transactions: TransactionRx,
    output: Option<TransactionTx>,
    shutdown: ShutdownSignal,
    state_tx: watch::Sender<StageState>,
    pending: PendingAcks,
    contributors: Vec<TrackedTransaction>,
    deadline: Deadline,
    maximum_shutdown_wait: Duration,
}

impl<I> BatchingLoop<I>
where
    I: Input,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stage: String,
        input: Arc<I>,
        policy: BatchPolicy,
        transactions: TransactionRx,
        output: TransactionTx,
        shutdown: ShutdownSignal,
        state_tx: watch::Sender<StageState>,
        maximum_shutdown_wait: Duration,
    ) -> Self {
        Self {
            stage,
            input,
            policy,
            transactions,
            output: Some(output),
            shutdown,
            state_tx,
            pending: PendingAcks::new(),
            contributors: Vec::new(),
            deadline: Deadline::new(),
            maximum_shutdown_wait,
        }
    }

    /// Runs the stage until it is fully closed.
    ///
    /// Whatever ends ingestion, the residual batch is flushed, every outstanding acknowledgment
    /// is resolved and the upstream input is closed before the shutdown signal reports
    /// completion.
    pub async fn run(mut self) -> ConveyorResult<()> {
        info!(policy = ?self.policy, "batching stage started");

        if self.ingest().await == IngestEnd::UpstreamExhausted {
            self.drain().await;
        }

        self.finish().await;

        Ok(())
    }

    async fn ingest(&mut self) -> IngestEnd {
        loop {
            if !self.deadline.is_armed()
                && let Some(until_next) = self.policy.until_next()
            {
                self.deadline.arm(until_next);
            }

            let event = tokio::select! {
                biased;

                _ = self.shutdown.close_at_leisure_requested() => LoopEvent::CloseRequested,
                _ = &mut self.deadline => LoopEvent::DeadlineElapsed,
                transaction = self.transactions.recv() => match transaction {
                    Some(transaction) => LoopEvent::Transaction(transaction),
                    None => LoopEvent::UpstreamExhausted,
                },
            };

            match event {
                LoopEvent::CloseRequested => {
                    info!("graceful close requested, stopping ingestion");
                    return IngestEnd::CloseRequested;
                }
                LoopEvent::UpstreamExhausted => {
                    info!("upstream exhausted, stopping ingestion");
                    return IngestEnd::UpstreamExhausted;
                }
                LoopEvent::DeadlineElapsed => {
                    self.flush(FlushTrigger::Period).await;
                }
                LoopEvent::Transaction(transaction) => {
                    if self.accept(transaction) {
                        self.flush(FlushTrigger::Policy).await;
                    }
                }
            }
        }
    }

    /// Honours an armed period after the upstream ended, then flushes.
    async fn drain(&mut self) {
        self.set_state(StageState::Draining);

        let mut trigger = FlushTrigger::Final;
        if self.deadline.is_armed() {
            debug!(
                fires_at = ?self.deadline.fires_at(),
                "waiting for the pending period before flushing"
            );

            tokio::select! {
                biased;

                _ = self.shutdown.close_at_leisure_requested() => return,
                _ = &mut self.deadline => trigger = FlushTrigger::Period,
            }
        }

        self.flush(trigger).await;
    }

    async fn finish(&mut self) {
        self.set_state(StageState::Flushing);

        debug!(pending = self.policy.count(), "flushing remaining records of batch");
        self.flush(FlushTrigger::Final).await;

        debug!(
            pending_acks = self.pending.count(),
            "waiting for pending acks to resolve before shutting down"
        );
        self.pending.wait_idle().await;
        debug!("pending acks resolved");

        self.close_input().await;

        // Dropping our sender ends the stream seen by the downstream consumer.
        self.output.take();

        self.set_state(StageState::Closed);
        self.shutdown.shutdown_complete();

        info!("batching stage closed");
    }

    /// Closes the upstream input, giving up on a graceful close once a forced one arrives.
    async fn close_input(&self) {
        self.input.close_async();

        let result = tokio::select! {
            biased;

            result = self.input.wait_for_close(self.maximum_shutdown_wait) => result,
            _ = self.shutdown.close_now_requested() => {
                debug!("forced close requested while closing the input");
                self.input.wait_for_close(Duration::ZERO).await
            }
        };

        if let Err(err) = result {
            warn!(error = %err, "input did not close cleanly");
        }
    }

    /// Adds the records of `transaction` to the policy and returns whether a flush is due.
    fn accept(&mut self, transaction: Transaction) -> bool {
        let tracked = TrackedTransaction::new(transaction);

        let mut ready = false;
        for record in tracked.message() {
            if self.policy.add(record.clone()) {
                ready = true;
            }
        }

        counter!(CONVEYOR_RECORDS_BATCHED_TOTAL, STAGE_LABEL => self.stage.clone())
            .increment(tracked.message().len() as u64);

        self.contributors.push(tracked);

        ready
    }

    async fn flush(&mut self, trigger: FlushTrigger) {
        // The restarted period is picked up on the next iteration.
        self.deadline.disarm();

        match self.send_batch(trigger).await {
            Ok(SendOutcome::Sent) => {}
            Err(err) => {
                warn!(
                    error = %err,
                    contributors = self.contributors.len(),
                    "batch abandoned before reaching downstream"
                );

                // The batch is gone, so its contributors are abandoned without a result.
                drop(std::mem::take(&mut self.contributors));
            }
            Ok(SendOutcome::Empty) => {
                // Every record was removed by processors, so contributors are done.
                if !self.contributors.is_empty() {
                    let contributors = std::mem::take(&mut self.contributors);
                    if let Err(err) =
                        forward_result(contributors, &self.shutdown.close_now_token(), Ok(()))
                    {
                        warn!(error = %err, "acknowledgment of an empty batch was not forwarded");
                    }
                }
            }
            Ok(SendOutcome::DownstreamClosed) => {
                warn!("downstream consumer is gone, closing stage");

                let contributors = std::mem::take(&mut self.contributors);
                let result = Err(conveyor_error!(
                    ErrorKind::DownstreamClosed,
                    "Downstream consumer closed before the batch was delivered"
                ));
                if let Err(err) =
                    forward_result(contributors, &self.shutdown.close_now_token(), result)
                {
                    warn!(error = %err, "downstream failure was not forwarded");
                }

                self.shutdown.close_at_leisure();
            }
        }
    }

    /// Flushes the policy and sends the batch downstream.
    ///
    /// Fails with [`ErrorKind::SendCancelled`] when a forced close arrives before the batch was
    /// accepted by the downstream channel.
    async fn send_batch(&mut self, trigger: FlushTrigger) -> ConveyorResult<SendOutcome> {
        let Some(output) = self.output.as_ref() else {
            return Ok(SendOutcome::DownstreamClosed);
        };

        let Some(batch) = self.policy.flush() else {
            return Ok(SendOutcome::Empty);
        };

        let batch_size = batch.len();
        let (transaction, ack_rx) = Transaction::new(batch);
        let close_now = self.shutdown.close_now_token();

        let sent = tokio::select! {
            biased;

            _ = close_now.cancelled() => {
                bail!(
                    ErrorKind::SendCancelled,
                    "Forced close interrupted sending a batch",
                    format!("batch of {batch_size} records was not delivered")
                );
            }
            sent = output.send(transaction) => sent,
        };

        if sent.is_err() {
            return Ok(SendOutcome::DownstreamClosed);
        }

        let contributors = std::mem::take(&mut self.contributors);
        debug!(
            batch_size,
            contributors = contributors.len(),
            trigger = trigger.as_str(),
            "batch sent downstream"
        );

        counter!(
            CONVEYOR_BATCHES_FLUSHED_TOTAL,
            STAGE_LABEL => self.stage.clone(),
            TRIGGER_LABEL => trigger.as_str(),
        )
        .increment(1);
        histogram!(CONVEYOR_BATCH_SIZE_RECORDS, STAGE_LABEL => self.stage.clone())
            .record(batch_size as f64);

        AckForwarder::new(
            self.stage.clone(),
            ack_rx,
            contributors,
            close_now,
            self.pending.clone(),
        )
        .spawn();

        Ok(SendOutcome::Sent)
    }

    fn set_state(&self, state: StageState) {
        self.state_tx.send_if_modified(|current| {
            if state > *current {
                debug!(from = %current, to = %state, "stage state changed");
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use conveyor_config::shared::BatchPolicyConfig;

    use super::*;
    use crate::input::memory::MemoryInput;
    use crate::transaction::create_transaction_channel;
    use crate::types::Record;

    fn batching_loop(
        output: TransactionTx,
        shutdown: ShutdownSignal,
    ) -> BatchingLoop<MemoryInput> {
        let (mut input, _handle) = MemoryInput::new(4);
        let transactions = input.take_transactions().unwrap();
        let (state_tx, _state_rx) = watch::channel(StageState::Running);
        let policy = BatchPolicy::new(BatchPolicyConfig::with_count(1)).unwrap();

        BatchingLoop::new(
            "test".to_string(),
            Arc::new(input),
            policy,
            transactions,
            output,
            shutdown,
            state_tx,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn forced_close_cancels_a_blocked_send() {
        let (output_tx, mut output_rx) = create_transaction_channel(1);
        let shutdown = ShutdownSignal::new();
        let mut batching_loop = batching_loop(output_tx, shutdown.clone());

        batching_loop.policy.add(Record::new("a"));
        let outcome = batching_loop.send_batch(FlushTrigger::Policy).await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);

        // The output buffer is now full, so the next send can only end through the forced close.
        batching_loop.policy.add(Record::new("b"));
        shutdown.close_now();
        let err = batching_loop
            .send_batch(FlushTrigger::Policy)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SendCancelled);
        let delivered = output_rx.recv().await.unwrap();
        assert_eq!(delivered.payload().payload_strings(), vec!["a"]);
    }

    #[tokio::test]
    async fn empty_policy_sends_nothing() {
        let (output_tx, _output_rx) = create_transaction_channel(1);
        let mut batching_loop = batching_loop(output_tx, ShutdownSignal::new());

        let outcome = batching_loop.send_batch(FlushTrigger::Final).await.unwrap();

        assert_eq!(outcome, SendOutcome::Empty);
    }
}
