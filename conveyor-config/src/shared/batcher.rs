use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Config;
use crate::shared::{BatchPolicyConfig, ValidationError};

/// Configuration of a batching stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatcherConfig {
    /// Triggers used to decide when the working batch is flushed.
    #[serde(default)]
    pub batch: BatchPolicyConfig,
    /// Capacity of the channel carrying batches to the downstream consumer.
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
    /// Upper bound, in milliseconds, on waiting for the wrapped input to close.
    #[serde(default = "default_maximum_shutdown_wait_ms")]
    pub maximum_shutdown_wait_ms: u64,
    /// How long, in milliseconds, before a `wait_for_close` deadline the stage forces closure.
    #[serde(default = "default_forced_close_margin_ms")]
    pub forced_close_margin_ms: u64,
}

impl BatcherConfig {
    /// Default capacity of the outbound batch channel.
    pub const DEFAULT_OUTPUT_BUFFER: usize = 1;

    /// Default bound on waiting for the wrapped input to close.
    pub const DEFAULT_MAXIMUM_SHUTDOWN_WAIT_MS: u64 = 20_000;

    /// Default forced close margin.
    pub const DEFAULT_FORCED_CLOSE_MARGIN_MS: u64 = 1_000;

    /// Returns a configuration using `batch` and defaults for everything else.
    pub fn with_batch(batch: BatchPolicyConfig) -> Self {
        Self {
            batch,
            ..Self::default()
        }
    }

    pub fn maximum_shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.maximum_shutdown_wait_ms)
    }

    pub fn forced_close_margin(&self) -> Duration {
        Duration::from_millis(self.forced_close_margin_ms)
    }

    /// Validates the stage settings.
    ///
    /// Ensures the outbound channel has a non-zero capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.output_buffer == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "output_buffer".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch: BatchPolicyConfig::default(),
            output_buffer: default_output_buffer(),
            maximum_shutdown_wait_ms: default_maximum_shutdown_wait_ms(),
            forced_close_margin_ms: default_forced_close_margin_ms(),
        }
    }
}

impl Config for BatcherConfig {}

fn default_output_buffer() -> usize {
    BatcherConfig::DEFAULT_OUTPUT_BUFFER
}

fn default_maximum_shutdown_wait_ms() -> u64 {
    BatcherConfig::DEFAULT_MAXIMUM_SHUTDOWN_WAIT_MS
}

fn default_forced_close_margin_ms() -> u64 {
    BatcherConfig::DEFAULT_FORCED_CLOSE_MARGIN_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_output_buffer_is_rejected() {
        let config = BatcherConfig {
            output_buffer: 0,
            ..BatcherConfig::default()
        };

        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue {
                field: "output_buffer".to_string(),
                constraint: "must be greater than 0".to_string(),
            })
        );
    }

    #[test]
    fn defaults_are_valid() {
        let config = BatcherConfig::with_batch(BatchPolicyConfig::with_count(3));

        assert!(config.validate().is_ok());
        assert_eq!(config.maximum_shutdown_wait(), Duration::from_secs(20));
        assert_eq!(config.forced_close_margin(), Duration::from_secs(1));
    }
}
