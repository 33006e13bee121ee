//! Metric names emitted by batching stages.
//!
//! The crate only records through the [`metrics`] facade; installing an exporter is up to the
//! embedding service.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use std::sync::Once;

/// Label carrying the name of the stage emitting a metric.
pub const STAGE_LABEL: &str = "stage";

/// Label carrying the trigger that made a batch ready.
pub const TRIGGER_LABEL: &str = "trigger";

/// Counter of batches sent downstream.
pub const CONVEYOR_BATCHES_FLUSHED_TOTAL: &str = "conveyor_batches_flushed_total";

/// Counter of records that entered a batch.
pub const CONVEYOR_RECORDS_BATCHED_TOTAL: &str = "conveyor_records_batched_total";

/// Histogram of the number of records per flushed batch.
pub const CONVEYOR_BATCH_SIZE_RECORDS: &str = "conveyor_batch_size_records";

/// Counter of results that could not be forwarded to a contributor.
pub const CONVEYOR_ACK_FORWARD_FAILURES_TOTAL: &str = "conveyor_ack_forward_failures_total";

/// Counter of batches abandoned by a forced close before their result was known.
pub const CONVEYOR_ABANDONED_BATCHES_TOTAL: &str = "conveyor_abandoned_batches_total";

/// Gauge of ack-forwarding tasks currently outstanding.
pub const CONVEYOR_PENDING_ACK_TASKS: &str = "conveyor_pending_ack_tasks";

static REGISTER_METRICS: Once = Once::new();

/// Registers the descriptions of conveyor metrics with the global metrics recorder.
///
/// Only the first call has an effect. Stages call this when they start, so a recorder must be
/// installed beforehand for the descriptions to be kept.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            CONVEYOR_BATCHES_FLUSHED_TOTAL,
            Unit::Count,
            "Total number of batches sent downstream, labeled by stage and trigger"
        );
        describe_counter!(
            CONVEYOR_RECORDS_BATCHED_TOTAL,
            Unit::Count,
            "Total number of records that entered a batch"
        );
        describe_histogram!(
            CONVEYOR_BATCH_SIZE_RECORDS,
            Unit::Count,
            "Number of records per batch sent downstream"
        );
        describe_counter!(
            CONVEYOR_ACK_FORWARD_FAILURES_TOTAL,
            Unit::Count,
            "Total number of acknowledgments that could not be forwarded to a contributor"
        );
        describe_counter!(
            CONVEYOR_ABANDONED_BATCHES_TOTAL,
            Unit::Count,
            "Total number of batches abandoned by a forced close before being acknowledged"
        );
        describe_gauge!(
            CONVEYOR_PENDING_ACK_TASKS,
            Unit::Count,
            "Number of batches sent downstream whose acknowledgment is still pending"
        );
    });
}
