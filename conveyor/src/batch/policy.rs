use conveyor_config::shared::BatchPolicyConfig;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::batch::processor::{BatchCheck, BatchProcessor};
use crate::bail;
use crate::error::{ConveyorResult, ErrorKind};
use crate::types::{Batch, Record, SizeHint};

/// Builder for [`BatchPolicy`], used to attach code-level checks and processors.
pub struct BatchPolicyBuilder {
    config: BatchPolicyConfig,
    check: Option<Box<dyn BatchCheck>>,
    processors: Vec<Box<dyn BatchProcessor>>,
}

impl BatchPolicyBuilder {
    /// Adds a predicate trigger evaluated against the whole working batch after every record.
    pub fn with_check<C>(mut self, check: C) -> Self
    where
        C: BatchCheck + 'static,
    {
        self.check = Some(Box::new(check));
        self
    }

    /// Appends a processor applied to every flushed batch.
    pub fn with_processor<P>(mut self, processor: P) -> Self
    where
        P: BatchProcessor + 'static,
    {
        self.processors.push(Box::new(processor));
        self
    }

    /// Builds the policy.
    ///
    /// Fails with [`ErrorKind::ConfigError`] when no trigger is configured at all, since such a
    /// policy would only ever flush on shutdown.
    pub fn build(self) -> ConveyorResult<BatchPolicy> {
        if self.config.is_noop() && self.check.is_none() {
            bail!(
                ErrorKind::ConfigError,
                "Batch policy has no trigger",
                "at least one of `count`, `byte_size`, `period_ms` or a check must be set"
            );
        }

        Ok(BatchPolicy {
            period: self.config.period(),
            config: self.config,
            check: self.check,
            processors: self.processors,
            records: Vec::new(),
            size_bytes: 0,
            triggered: false,
            last_flush: Instant::now(),
        })
    }
}

/// Accumulates records and decides when the working batch should be flushed.
///
/// Count, byte size and check triggers are evaluated on [`BatchPolicy::add`] and combine by
/// logical OR. The period trigger is reported through [`BatchPolicy::until_next`] and is measured
/// from the previous flush, or from creation, independently of how many records arrived.
/// Flushing always drains the whole working batch.
pub struct BatchPolicy {
    config: BatchPolicyConfig,
    period: Option<Duration>,
    check: Option<Box<dyn BatchCheck>>,
    processors: Vec<Box<dyn BatchProcessor>>,
    records: Vec<Record>,
    size_bytes: usize,
    triggered: bool,
    last_flush: Instant,
}

impl BatchPolicy {
    pub fn builder(config: BatchPolicyConfig) -> BatchPolicyBuilder {
        BatchPolicyBuilder {
            config,
            check: None,
            processors: Vec::new(),
        }
    }

    /// Builds a policy from configuration alone.
    pub fn new(config: BatchPolicyConfig) -> ConveyorResult<Self> {
        Self::builder(config).build()
    }

    /// Adds `record` to the working batch.
    ///
    /// Returns `true` once a count, byte size or check trigger has been met. The batch stays
    /// ready until it is flushed.
    pub fn add(&mut self, record: Record) -> bool {
        self.size_bytes += record.size_hint();
        self.records.push(record);

        if !self.triggered && self.config.count > 0 && self.records.len() >= self.config.count {
            self.triggered = true;
        }

        if !self.triggered
            && self.config.byte_size > 0
            && self.size_bytes >= self.config.byte_size
        {
            self.triggered = true;
        }

        if !self.triggered
            && let Some(check) = &self.check
            && check.check(&self.records)
        {
            self.triggered = true;
        }

        self.triggered
    }

    /// Returns the time left before the period trigger fires.
    ///
    /// Returns `None` without a period and [`Duration::ZERO`] once the period has elapsed.
    pub fn until_next(&self) -> Option<Duration> {
        self.period
            .map(|period| period.saturating_sub(self.last_flush.elapsed()))
    }

    /// Drains the working batch and restarts the period.
    ///
    /// Returns `None` when nothing is pending or when processors removed every record. Safe to
    /// call whether or not a trigger was met.
    pub fn flush(&mut self) -> Option<Batch> {
        self.last_flush = Instant::now();
        self.triggered = false;
        self.size_bytes = 0;

        if self.records.is_empty() {
            return None;
        }

        let records = std::mem::take(&mut self.records);
        let batch = self
            .processors
            .iter()
            .fold(Batch::new(records), |batch, processor| processor.process(batch));

        (!batch.is_empty()).then_some(batch)
    }

    /// Returns the number of records in the working batch.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Returns the cumulative serialized size of the working batch.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Returns `true` if a count, byte size or check trigger has been met since the last flush.
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }
}

impl fmt::Debug for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchPolicy")
            .field("config", &self.config)
            .field("has_check", &self.check.is_some())
            .field("processors", &self.processors.len())
            .field("count", &self.records.len())
            .field("size_bytes", &self.size_bytes)
            .field("triggered", &self.triggered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &str) -> Record {
        Record::new(payload.to_string())
    }

    #[test]
    fn policy_without_triggers_is_rejected() {
        let err = BatchPolicy::new(BatchPolicyConfig::default()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn check_alone_is_a_valid_trigger() {
        let policy = BatchPolicy::builder(BatchPolicyConfig::default())
            .with_check(|records: &[Record]| records.len() > 1)
            .build();

        assert!(policy.is_ok());
    }

    #[test]
    fn count_trigger_marks_batch_ready() {
        let mut policy = BatchPolicy::new(BatchPolicyConfig::with_count(3)).unwrap();

        assert!(!policy.add(record("a")));
        assert!(!policy.add(record("b")));
        assert!(policy.add(record("c")));
        assert_eq!(policy.count(), 3);
    }

    #[test]
    fn byte_size_trigger_counts_metadata() {
        let mut policy = BatchPolicy::new(BatchPolicyConfig {
            byte_size: 10,
            ..BatchPolicyConfig::default()
        })
        .unwrap();

        assert!(!policy.add(record("abcd")));
        assert!(policy.add(record("ab").with_metadata("key", "v")));
        assert_eq!(policy.size_bytes(), 10);
    }

    #[test]
    fn check_sees_whole_working_batch() {
        let mut policy = BatchPolicy::builder(BatchPolicyConfig::default())
            .with_check(|records: &[Record]| {
                records
                    .last()
                    .is_some_and(|record| record.metadata_value("end") == Some("true"))
            })
            .build()
            .unwrap();

        assert!(!policy.add(record("a")));
        assert!(policy.add(record("b").with_metadata("end", "true")));

        let batch = policy.flush().unwrap();
        assert_eq!(batch.payload_strings(), vec!["a", "b"]);
    }

    #[test]
    fn readiness_persists_until_flush() {
        let mut policy = BatchPolicy::new(BatchPolicyConfig::with_count(2)).unwrap();

        assert!(!policy.add(record("a")));
        assert!(policy.add(record("b")));
        assert!(policy.add(record("c")));

        let batch = policy.flush().unwrap();
        assert_eq!(batch.payload_strings(), vec!["a", "b", "c"]);
        assert!(!policy.is_triggered());
        assert!(!policy.add(record("d")));
    }

    #[test]
    fn flush_drains_everything_in_arrival_order() {
        let mut policy = BatchPolicy::new(BatchPolicyConfig::with_count(2)).unwrap();

        for payload in ["a", "b", "c"] {
            policy.add(record(payload));
        }

        let batch = policy.flush().unwrap();
        assert_eq!(batch.payload_strings(), vec!["a", "b", "c"]);
        assert_eq!(policy.count(), 0);
        assert_eq!(policy.size_bytes(), 0);
        assert!(policy.flush().is_none());
    }

    #[test]
    fn until_next_is_none_without_period() {
        let policy = BatchPolicy::new(BatchPolicyConfig::with_count(2)).unwrap();

        assert_eq!(policy.until_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn until_next_decreases_and_resets_on_flush() {
        let period = Duration::from_millis(100);
        let mut policy = BatchPolicy::new(BatchPolicyConfig::with_period(period)).unwrap();

        assert_eq!(policy.until_next(), Some(period));

        tokio::time::advance(Duration::from_millis(30)).await;
        let first = policy.until_next().unwrap();
        tokio::time::advance(Duration::from_millis(30)).await;
        let second = policy.until_next().unwrap();

        assert!(second < first);
        assert_eq!(second, Duration::from_millis(40));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(policy.until_next(), Some(Duration::ZERO));

        policy.add(record("a"));
        assert!(policy.flush().is_some());
        assert_eq!(policy.until_next(), Some(period));
    }

    #[test]
    fn processors_run_in_order_and_can_empty_a_batch() {
        let mut policy = BatchPolicy::builder(BatchPolicyConfig::with_count(10))
            .with_processor(|batch: Batch| {
                Batch::new(
                    batch
                        .into_iter()
                        .filter(|record| record.payload().as_ref() != b"drop")
                        .collect(),
                )
            })
            .with_processor(|batch: Batch| {
                Batch::new(
                    batch
                        .into_iter()
                        .map(|record| record.with_metadata("seen", "yes"))
                        .collect(),
                )
            })
            .build()
            .unwrap();

        policy.add(record("keep"));
        policy.add(record("drop"));
        let batch = policy.flush().unwrap();
        assert_eq!(batch.payload_strings(), vec!["keep"]);
        assert_eq!(batch.records()[0].metadata_value("seen"), Some("yes"));

        policy.add(record("drop"));
        assert!(policy.flush().is_none());
    }
}
