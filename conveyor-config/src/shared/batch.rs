use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trigger parameters of a batch policy.
///
/// Every trigger is disabled when set to zero. Enabled triggers combine by logical OR: the
/// first one to be met makes the working batch ready and the whole batch is flushed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchPolicyConfig {
    /// Number of records at which a batch is flushed.
    #[serde(default)]
    pub count: usize,
    /// Cumulative serialized size, in bytes, at which a batch is flushed.
    #[serde(default)]
    pub byte_size: usize,
    /// Maximum age, in milliseconds, of a batch measured from the previous flush.
    #[serde(default)]
    pub period_ms: u64,
}

impl BatchPolicyConfig {
    /// Returns a policy flushing every `count` records.
    pub fn with_count(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    /// Returns a policy flushing every `period`.
    pub fn with_period(period: Duration) -> Self {
        Self {
            period_ms: period.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Returns the configured period, if any.
    pub fn period(&self) -> Option<Duration> {
        (self.period_ms > 0).then(|| Duration::from_millis(self.period_ms))
    }

    /// Returns `true` when no configurable trigger is enabled.
    pub fn is_noop(&self) -> bool {
        self.count == 0 && self.byte_size == 0 && self.period_ms == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_disable_triggers() {
        let config = BatchPolicyConfig::default();

        assert!(config.is_noop());
        assert_eq!(config.period(), None);
    }

    #[test]
    fn period_is_exposed_as_duration() {
        let config = BatchPolicyConfig::with_period(Duration::from_millis(250));

        assert!(!config.is_noop());
        assert_eq!(config.period(), Some(Duration::from_millis(250)));
    }
}
