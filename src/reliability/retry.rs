use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    #[default]
    ExponentialBackoff,
    LinearBackoff,
    FixedDelay,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total deliveries of one buffer, the first one included.
    pub max_deliveries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_deliveries == 0 {
            return Err(RetryError::InvalidConfig(
                "max_deliveries must be at least 1".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(RetryError::InvalidConfig(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Backoff between redeliveries of a buffer the output answered `RETRY` for.
#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    config: RetryConfig,
}

impl RedeliveryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self, RetryError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// True once `deliveries` attempts have been made.
    pub fn should_give_up(&self, deliveries: u32) -> bool {
        deliveries >= self.config.max_deliveries
    }

    /// Wait before the redelivery that follows `failures` failed deliveries.
    pub fn calculate_delay(&self, failures: u32) -> Duration {
        let base_millis = self.config.base_delay.as_millis() as u64;
        let step = failures.saturating_sub(1);

        let delay = match self.config.strategy {
            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2_u64.checked_pow(step).unwrap_or(u64::MAX);
                Duration::from_millis(base_millis.saturating_mul(multiplier))
            }
            RetryStrategy::LinearBackoff => {
                Duration::from_millis(base_millis.saturating_mul(step as u64 + 1))
            }
            RetryStrategy::FixedDelay => self.config.base_delay,
        };

        let capped = delay.min(self.config.max_delay);
        if self.config.jitter {
            apply_jitter(capped)
        } else {
            capped
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor = rng.random_range(0.5..1.5);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}
