#![cfg(feature = "test-utils")]

use conveyor::batch::policy::BatchPolicy;
use conveyor::error::ErrorKind;
use conveyor::input::Input;
use conveyor::input::memory::MemoryInput;
use conveyor::stage::StageState;
use conveyor::test_utils::collector::{AckMode, BatchCollector};
use conveyor::test_utils::input::{TestStage, batcher_config, send_payloads};
use conveyor::test_utils::notify::within_timeout;
use conveyor::types::{Batch, Message, Record};
use conveyor::workers::base::{Worker, WorkerHandle};
use conveyor::workers::batcher::BatcherWorker;
use conveyor_config::shared::{BatchPolicyConfig, BatcherConfig};
use conveyor_telemetry::tracing::init_test_tracing;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn count_trigger_splits_stream_and_flushes_remainder_on_close() {
    init_test_tracing();

    let stage = TestStage::start(batcher_config(3, None), AckMode::Ack).await;

    let ack_rxs = stage.send(&["A", "B", "C", "D", "E"]).await;
    stage.input.finish();
    stage.collector.wait_for_end().await;

    assert_eq!(
        stage.collector.payloads().await,
        vec![vec!["A", "B", "C"], vec!["D", "E"]]
    );
    for ack_rx in ack_rxs {
        assert_eq!(ack_rx.await.unwrap(), Ok(()));
    }

    stage
        .batcher
        .wait_for_close(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(stage.batcher.state(), StageState::Closed);
    stage.batcher.wait().await.unwrap();
}

#[tokio::test]
async fn exact_multiple_of_count_leaves_no_residual_batch() {
    init_test_tracing();

    let stage = TestStage::start(batcher_config(3, None), AckMode::Ack).await;

    let ack_rxs = stage.send(&["A", "B", "C", "D", "E", "F"]).await;
    stage.input.finish();
    stage.collector.wait_for_end().await;

    assert_eq!(
        stage.collector.payloads().await,
        vec![vec!["A", "B", "C"], vec!["D", "E", "F"]]
    );
    for ack_rx in ack_rxs {
        assert_eq!(ack_rx.await.unwrap(), Ok(()));
    }
}

#[tokio::test]
async fn stage_state_is_published_to_subscribers() {
    init_test_tracing();

    let stage = TestStage::start(batcher_config(2, None), AckMode::Ack).await;
    let mut state_rx = stage.batcher.subscribe_state();
    assert_eq!(*state_rx.borrow_and_update(), StageState::Running);

    stage.input.finish();
    let closed = within_timeout(state_rx.wait_for(|state| *state == StageState::Closed))
        .await
        .is_ok();

    assert!(closed);
    assert_eq!(stage.batcher.state(), StageState::Closed);
}

#[tokio::test]
async fn batches_have_count_size_and_preserve_order() {
    init_test_tracing();

    let payloads: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    let payloads: Vec<&str> = payloads.iter().map(String::as_str).collect();

    let stage = TestStage::start(batcher_config(4, None), AckMode::Ack).await;
    stage.send(&payloads).await;
    stage.input.finish();
    stage.collector.wait_for_end().await;

    let batches = stage.collector.payloads().await;
    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 4, 2]);

    let flattened: Vec<String> = batches.into_iter().flatten().collect();
    assert_eq!(flattened, payloads);
}

#[tokio::test(start_paused = true)]
async fn period_trigger_flushes_without_upstream_close() {
    init_test_tracing();

    let period = Duration::from_millis(100);
    let stage = TestStage::start(batcher_config(0, Some(period)), AckMode::Ack).await;
    let started = Instant::now();

    let first_batch = stage.collector.wait_for_batches(1).await;
    let ack_rxs = stage.send(&["A"]).await;
    first_batch.notified().await;

    assert!(started.elapsed() >= period);
    assert_eq!(stage.collector.payloads().await, vec![vec!["A"]]);
    for ack_rx in ack_rxs {
        assert_eq!(ack_rx.await.unwrap(), Ok(()));
    }

    assert_eq!(stage.batcher.state(), StageState::Running);
}

#[tokio::test(start_paused = true)]
async fn pending_period_is_honoured_after_upstream_ends() {
    init_test_tracing();

    let period = Duration::from_millis(100);
    let stage = TestStage::start(batcher_config(10, Some(period)), AckMode::Ack).await;
    let started = Instant::now();

    stage.send(&["A", "B"]).await;
    stage.input.finish();
    stage.collector.wait_for_end().await;

    assert!(started.elapsed() >= period);
    assert_eq!(stage.collector.payloads().await, vec![vec!["A", "B"]]);
}

#[tokio::test]
async fn flush_drains_every_record_of_a_multi_record_transaction() {
    init_test_tracing();

    let stage = TestStage::start(batcher_config(2, None), AckMode::Ack).await;

    let message: Message = vec![Record::new("a"), Record::new("b"), Record::new("c")].into();
    let ack_rx = stage.input.send(message).await.unwrap();
    let single_batch = stage.collector.wait_for_batches(1).await;
    single_batch.notified().await;

    assert_eq!(stage.collector.payloads().await, vec![vec!["a", "b", "c"]]);
    assert_eq!(ack_rx.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn check_trigger_flushes_on_marker_record() {
    init_test_tracing();

    let policy = BatchPolicy::builder(BatchPolicyConfig::default())
        .with_check(|records: &[Record]| {
            records
                .last()
                .is_some_and(|record| record.metadata_value("end_of_batch").is_some())
        })
        .build()
        .unwrap();
    let stage =
        TestStage::start_with_policy(BatcherConfig::default(), policy, AckMode::Ack).await;

    stage.send(&["a", "b"]).await;
    stage
        .input
        .send(Message::single(
            Record::new("c").with_metadata("end_of_batch", "true"),
        ))
        .await
        .unwrap();
    stage.send(&["d"]).await;

    let first_batch = stage.collector.wait_for_batches(1).await;
    first_batch.notified().await;
    assert_eq!(stage.collector.payloads().await, vec![vec!["a", "b", "c"]]);

    stage.input.finish();
    stage.collector.wait_for_end().await;
    assert_eq!(
        stage.collector.payloads().await,
        vec![vec!["a", "b", "c"], vec!["d"]]
    );
}

#[tokio::test]
async fn batch_emptied_by_processors_acknowledges_contributors() {
    init_test_tracing();

    let policy = BatchPolicy::builder(BatchPolicyConfig::with_count(2))
        .with_processor(|batch: Batch| {
            Batch::new(
                batch
                    .into_iter()
                    .filter(|record| record.metadata_value("skip").is_none())
                    .collect(),
            )
        })
        .build()
        .unwrap();
    let stage =
        TestStage::start_with_policy(BatcherConfig::default(), policy, AckMode::Ack).await;

    let mut ack_rxs = Vec::new();
    for payload in ["a", "b"] {
        let message = Message::single(Record::new(payload).with_metadata("skip", "yes"));
        ack_rxs.push(stage.input.send(message).await.unwrap());
    }
    ack_rxs.extend(stage.send(&["c", "d"]).await);

    stage.input.finish();
    stage.collector.wait_for_end().await;

    assert_eq!(stage.collector.payloads().await, vec![vec!["c", "d"]]);
    for ack_rx in ack_rxs {
        assert_eq!(ack_rx.await.unwrap(), Ok(()));
    }
}

#[tokio::test]
async fn stages_can_be_chained() {
    init_test_tracing();

    let (input, handle) = MemoryInput::new(16);
    let inner = BatcherWorker::new(batcher_config(2, None), input)
        .with_name("inner")
        .start()
        .await
        .unwrap();
    let mut outer = BatcherWorker::new(batcher_config(4, None), inner)
        .with_name("outer")
        .start()
        .await
        .unwrap();
    let collector = BatchCollector::spawn(outer.take_transactions().unwrap(), AckMode::Ack);

    let ack_rxs = send_payloads(&handle, &["a", "b", "c", "d"]).await;
    let joined_batch = collector.wait_for_batches(1).await;
    joined_batch.notified().await;

    assert_eq!(collector.payloads().await, vec![vec!["a", "b", "c", "d"]]);
    for ack_rx in ack_rxs {
        assert_eq!(ack_rx.await.unwrap(), Ok(()));
    }

    assert!(outer.connected());
    outer.close_async();
    outer.wait_for_close(Duration::from_secs(5)).await.unwrap();
    assert_eq!(outer.input().state(), StageState::Closed);
    assert!(handle.is_closed());
}

#[tokio::test]
async fn start_rejects_invalid_configuration() {
    init_test_tracing();

    let (input, _handle) = MemoryInput::new(1);
    let config = BatcherConfig {
        output_buffer: 0,
        ..batcher_config(2, None)
    };
    let err = BatcherWorker::new(config, input).start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);

    let (input, _handle) = MemoryInput::new(1);
    let err = BatcherWorker::new(BatcherConfig::default(), input)
        .start()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test]
async fn start_rejects_an_input_whose_stream_was_taken() {
    init_test_tracing();

    let (mut input, _handle) = MemoryInput::new(1);
    let _transactions = input.take_transactions();

    let err = BatcherWorker::new(batcher_config(2, None), input)
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InputAlreadyTaken);
}
