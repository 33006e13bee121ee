use conveyor_config::shared::{BatchPolicyConfig, BatcherConfig};
use std::time::Duration;

use crate::batch::policy::BatchPolicy;
use crate::input::Input;
use crate::input::memory::{MemoryInput, MemoryInputHandle};
use crate::test_utils::collector::{AckMode, BatchCollector};
use crate::transaction::AckRx;
use crate::types::{Message, Record};
use crate::workers::base::Worker;
use crate::workers::batcher::{Batcher, BatcherWorker};

/// Capacity of the memory inputs created by [`TestStage`].
pub const TEST_INPUT_CAPACITY: usize = 64;

/// Sends every payload as its own single-record transaction and returns their ack receivers.
pub async fn send_payloads(handle: &MemoryInputHandle, payloads: &[&str]) -> Vec<AckRx> {
    let mut ack_rxs = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let ack_rx = handle
            .send(Message::single(Record::new(payload.to_string())))
            .await
            .expect("failed to send payload to memory input");
        ack_rxs.push(ack_rx);
    }

    ack_rxs
}

/// Returns a stage configuration with the given triggers and fast shutdown defaults.
pub fn batcher_config(count: usize, period: Option<Duration>) -> BatcherConfig {
    let batch = BatchPolicyConfig {
        count,
        period_ms: period.map(|period| period.as_millis() as u64).unwrap_or(0),
        ..BatchPolicyConfig::default()
    };

    BatcherConfig {
        maximum_shutdown_wait_ms: 5_000,
        ..BatcherConfig::with_batch(batch)
    }
}

/// A started stage wired to a memory input and a collector.
pub struct TestStage {
    pub batcher: Batcher<MemoryInput>,
    pub input: MemoryInputHandle,
    pub collector: BatchCollector,
}

impl TestStage {
    /// Starts a stage over a fresh [`MemoryInput`].
    pub async fn start(config: BatcherConfig, mode: AckMode) -> Self {
        let (input, handle) = MemoryInput::new(TEST_INPUT_CAPACITY);
        Self::start_with(BatcherWorker::new(config, input), handle, mode).await
    }

    /// Starts a stage over a fresh [`MemoryInput`] using `policy`.
    pub async fn start_with_policy(
        config: BatcherConfig,
        policy: BatchPolicy,
        mode: AckMode,
    ) -> Self {
        let (input, handle) = MemoryInput::new(TEST_INPUT_CAPACITY);
        Self::start_with(BatcherWorker::new(config, input).with_policy(policy), handle, mode).await
    }

    /// Starts a stage over a [`MemoryInput`] that only closes when forced to.
    pub async fn start_holding_close(config: BatcherConfig, mode: AckMode) -> Self {
        let (input, handle) = MemoryInput::holding_close(TEST_INPUT_CAPACITY);
        Self::start_with(BatcherWorker::new(config, input), handle, mode).await
    }

    async fn start_with(
        worker: BatcherWorker<MemoryInput>,
        input: MemoryInputHandle,
        mode: AckMode,
    ) -> Self {
        let mut batcher = worker.start().await.expect("failed to start batching stage");
        let transactions = batcher
            .take_transactions()
            .expect("stage output was already taken");
        let collector = BatchCollector::spawn(transactions, mode);

        Self {
            batcher,
            input,
            collector,
        }
    }

    pub async fn send(&self, payloads: &[&str]) -> Vec<AckRx> {
        send_payloads(&self.input, payloads).await
    }
}
