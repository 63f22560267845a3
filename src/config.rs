use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Used for the `X-<product>-*` header names and the user agent.
    pub product_name: String,
    /// Parallel delivery workers. Retries of one delivery never overlap
    /// regardless of this value.
    pub worker_count: usize,
    /// Capacity of the ready queue between fan-out and workers.
    pub queue_size: usize,
    pub delivery_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub health_check_timeout_ms: u64,
    /// Pause a worker takes after each attempt.
    pub inter_delivery_delay_ms: u64,
    /// Upper bound of random jitter added to retry backoff.
    pub retry_jitter_ms: u64,
    /// Trigger `integration.webhook.delivery.failed` when a delivery
    /// exhausts its retries.
    pub emit_failure_events: bool,
    /// Finished deliveries whose live state stays queryable through
    /// `delivery_state`.
    pub terminal_state_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            product_name: "SleepFix".to_string(),
            worker_count: 1,
            queue_size: 1_000,
            delivery_timeout_ms: 30_000,
            probe_timeout_ms: 10_000,
            health_check_timeout_ms: 5_000,
            inter_delivery_delay_ms: 100,
            retry_jitter_ms: 0,
            emit_failure_events: false,
            terminal_state_capacity: 10_000,
        }
    }
}

impl DispatcherConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.product_name.is_empty()
            || !self.product_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigError::Invalid(format!(
                "product_name must be a non-empty header token, got {:?}",
                self.product_name
            )));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".into()));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid("queue_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn inter_delivery_delay(&self) -> Duration {
        Duration::from_millis(self.inter_delivery_delay_ms)
    }
}
