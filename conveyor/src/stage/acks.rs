use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

use crate::concurrency::pending::{PendingAckGuard, PendingAcks};
use crate::error::{ConveyorError, ConveyorResult};
use crate::metrics::{
    CONVEYOR_ABANDONED_BATCHES_TOTAL, CONVEYOR_ACK_FORWARD_FAILURES_TOTAL,
    CONVEYOR_PENDING_ACK_TASKS, STAGE_LABEL,
};
use crate::transaction::{AckResult, AckRx, TrackedTransaction};

/// Forwards a copy of `result` to every contributor.
///
/// Each contributor gets its own attempt regardless of how the others went. Failures are
/// collected and returned together.
pub fn forward_result(
    contributors: Vec<TrackedTransaction>,
    close_now: &CancellationToken,
    result: AckResult,
) -> ConveyorResult<()> {
    let errors: Vec<ConveyorError> = contributors
        .into_iter()
        .filter_map(|contributor| contributor.ack(close_now, result.clone()).err())
        .collect();

    if errors.is_empty() {
        return Ok(());
    }

    Err(errors.into())
}

/// Task resolving the acknowledgment of one outbound batch.
///
/// The task owns the contributors of the batch. It waits for the downstream result, bounded by
/// the forced close, and then fans it out through [`forward_result`]. Its [`PendingAckGuard`] is
/// released when the task ends, whichever way it ends.
#[derive(Debug)]
pub struct AckForwarder {
    stage: String,
    ack_rx: AckRx,
    contributors: Vec<TrackedTransaction>,
    close_now: CancellationToken,
    pending: PendingAcks,
    guard: PendingAckGuard,
}

impl AckForwarder {
    /// Registers the task with `pending` right away, so a stage waiting for idleness cannot miss it.
    pub fn new(
        stage: String,
        ack_rx: AckRx,
        contributors: Vec<TrackedTransaction>,
        close_now: CancellationToken,
        pending: PendingAcks,
    ) -> Self {
        let guard = pending.track();

        Self {
            stage,
            ack_rx,
            contributors,
            close_now,
            pending,
            guard,
        }
    }

    pub fn spawn(self) {
        gauge!(CONVEYOR_PENDING_ACK_TASKS, STAGE_LABEL => self.stage.clone())
            .set(self.pending.count() as f64);

        tokio::spawn(self.run().instrument(Span::current()));
    }

    async fn run(self) {
        let AckForwarder {
            stage,
            ack_rx,
            contributors,
            close_now,
            pending,
            guard,
        } = self;

        let result = tokio::select! {
            biased;

            _ = close_now.cancelled() => {
                warn!(
                    contributors = contributors.len(),
                    "forced close abandoned a batch awaiting its acknowledgment"
                );
                counter!(CONVEYOR_ABANDONED_BATCHES_TOTAL, STAGE_LABEL => stage.clone()).increment(1);

                None
            }
            result = ack_rx => match result {
                Ok(result) => Some(result),
                Err(_) => {
                    warn!(
                        contributors = contributors.len(),
                        "downstream dropped a batch without acknowledging it"
                    );

                    None
                }
            }
        };

        if let Some(result) = result {
            let succeeded = result.is_ok();
            let contributors_count = contributors.len();

            match forward_result(contributors, &close_now, result) {
                Ok(()) => debug!(
                    contributors = contributors_count,
                    succeeded, "acknowledgment forwarded"
                ),
                Err(err) => {
                    let failures = err.kinds().len();
                    warn!(
                        contributors = contributors_count,
                        failures,
                        error = %err,
                        "acknowledgment could not be forwarded to every contributor"
                    );
                    counter!(CONVEYOR_ACK_FORWARD_FAILURES_TOTAL, STAGE_LABEL => stage.clone())
                        .increment(failures as u64);
                }
            }
        }

        drop(guard);
        gauge!(CONVEYOR_PENDING_ACK_TASKS, STAGE_LABEL => stage).set(pending.count() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conveyor_error;
    use crate::error::ErrorKind;
    use crate::transaction::{AckSink, Transaction};
    use crate::types::{Message, Record};
    use tokio::sync::oneshot::error::TryRecvError;

    fn contributors(count: usize) -> (Vec<TrackedTransaction>, Vec<AckRx>) {
        (0..count)
            .map(|i| {
                let (transaction, ack_rx) =
                    Transaction::new(Message::single(Record::new(i.to_string())));
                (TrackedTransaction::new(transaction), ack_rx)
            })
            .unzip()
    }

    #[test]
    fn every_contributor_receives_the_result() {
        let (tracked, ack_rxs) = contributors(3);
        let failure = conveyor_error!(ErrorKind::DownstreamRejected, "Rejected");

        forward_result(tracked, &CancellationToken::new(), Err(failure.clone())).unwrap();

        for mut ack_rx in ack_rxs {
            assert_eq!(ack_rx.try_recv().unwrap(), Err(failure.clone()));
        }
    }

    #[test]
    fn a_gone_producer_does_not_stop_the_others() {
        let (tracked, mut ack_rxs) = contributors(3);
        drop(ack_rxs.remove(1));

        let err = forward_result(tracked, &CancellationToken::new(), Ok(())).unwrap_err();

        assert_eq!(err.kinds(), vec![ErrorKind::AckReceiverDropped]);
        for mut ack_rx in ack_rxs {
            assert_eq!(ack_rx.try_recv().unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn forwarder_resolves_after_downstream_ack() {
        let (tracked, ack_rxs) = contributors(2);
        let (sink, batch_ack_rx) = AckSink::new();
        let pending = PendingAcks::new();

        AckForwarder::new(
            "test".to_string(),
            batch_ack_rx,
            tracked,
            CancellationToken::new(),
            pending.clone(),
        )
        .spawn();
        assert_eq!(pending.count(), 1);

        sink.send(Ok(())).unwrap();
        pending.wait_idle().await;

        for ack_rx in ack_rxs {
            assert_eq!(ack_rx.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn forced_close_abandons_contributors() {
        let (tracked, ack_rxs) = contributors(2);
        let (_sink, batch_ack_rx) = AckSink::new();
        let pending = PendingAcks::new();
        let close_now = CancellationToken::new();

        AckForwarder::new(
            "test".to_string(),
            batch_ack_rx,
            tracked,
            close_now.clone(),
            pending.clone(),
        )
        .spawn();

        close_now.cancel();
        pending.wait_idle().await;

        for mut ack_rx in ack_rxs {
            assert!(matches!(ack_rx.try_recv(), Err(TryRecvError::Closed)));
        }
    }

    #[tokio::test]
    async fn unacknowledged_drop_closes_contributors() {
        let (tracked, ack_rxs) = contributors(1);
        let (sink, batch_ack_rx) = AckSink::new();
        let pending = PendingAcks::new();

        AckForwarder::new(
            "test".to_string(),
            batch_ack_rx,
            tracked,
            CancellationToken::new(),
            pending.clone(),
        )
        .spawn();

        drop(sink);
        pending.wait_idle().await;

        for ack_rx in ack_rxs {
            assert!(ack_rx.await.is_err());
        }
    }
}
