//! Pipeline configuration.
//!
//! Every field has a default, so a TOML file only needs the settings it
//! changes:
//!
//! ```toml
//! publish_mode = "outbox"
//! worker_mode = "outbox-processor"
//! max_retries = 5
//!
//! [outbox_retry]
//! kind = "exponential"
//! base_ms = 1000
//! max_ms = 60000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How new work is announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishMode {
    /// Push the order id onto the in-process queue after commit.
    #[default]
    InMemory,
    /// Write an outbox row in the same transaction as the order.
    Outbox,
    /// Send a message to the external transport after commit.
    Transport,
}

/// Which consumer loop a worker thread runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerMode {
    /// Pop ids from the in-process queue.
    #[default]
    InMemory,
    /// Poll the outbox and process orders directly.
    OutboxProcessor,
    /// Poll the outbox and forward rows to the external transport.
    OutboxRelay,
    /// Receive messages from the external transport and process them.
    TransportConsumer,
}

impl WorkerMode {
    /// Whether this loop picks up what `publish` produces.
    ///
    /// A relay only forwards outbox rows; the transport consumers that finish
    /// the job run in a separate pipeline configured for transport publishing.
    pub fn consumes(self, publish: PublishMode) -> bool {
        matches!(
            (publish, self),
            (PublishMode::InMemory, WorkerMode::InMemory)
                | (PublishMode::Outbox, WorkerMode::OutboxProcessor)
                | (PublishMode::Outbox, WorkerMode::OutboxRelay)
                | (PublishMode::Transport, WorkerMode::TransportConsumer)
        )
    }
}

/// Upper bound for blocking waits, which is how long a stop request can take
/// to be noticed.
pub const MAX_WAIT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub publish_mode: PublishMode,
    pub worker_mode: WorkerMode,
    /// Threads started for `worker_mode`.
    pub worker_count: usize,
    /// Prefix for claimant ids written to locked outbox rows.
    pub worker_id: String,
    /// Failed attempts allowed before an order is dead-lettered.
    pub max_retries: u32,
    /// Backoff before an in-memory retry is re-queued.
    pub retry_delay_ms: u64,
    pub queue_poll_interval_ms: u64,
    pub outbox_poll_interval_ms: u64,
    pub outbox_batch_size: usize,
    /// PROCESSING rows locked longer than this are handed out again.
    pub outbox_lock_timeout_secs: u64,
    pub outbox_retry: RetryPolicy,
    pub relay_retry: RetryPolicy,
    /// Give up relaying a row after this many failed sends. Unbounded if unset.
    pub relay_max_attempts: Option<u32>,
    pub transport_wait_ms: u64,
    pub log: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publish_mode: PublishMode::default(),
            worker_mode: WorkerMode::default(),
            worker_count: 1,
            worker_id: "worker-1".into(),
            max_retries: 3,
            retry_delay_ms: 1_000,
            queue_poll_interval_ms: 100,
            outbox_poll_interval_ms: 1_000,
            outbox_batch_size: 5,
            outbox_lock_timeout_secs: 30,
            outbox_retry: RetryPolicy::Fixed { delay_ms: 1_000 },
            relay_retry: RetryPolicy::Fixed { delay_ms: 5_000 },
            relay_max_attempts: None,
            transport_wait_ms: 1_000,
            log: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".into()));
        }
        if self.outbox_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "outbox_batch_size must be at least 1".into(),
            ));
        }
        if self.worker_id.trim().is_empty() {
            return Err(ConfigError::Invalid("worker_id must not be blank".into()));
        }
        if !self.worker_mode.consumes(self.publish_mode) {
            return Err(ConfigError::Invalid(format!(
                "worker_mode {:?} cannot consume {:?} publishing",
                self.worker_mode, self.publish_mode
            )));
        }
        for (name, ms) in [
            ("queue_poll_interval_ms", self.queue_poll_interval_ms),
            ("transport_wait_ms", self.transport_wait_ms),
        ] {
            if ms > MAX_WAIT_MS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_WAIT_MS}"
                )));
            }
        }
        Ok(())
    }

    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    pub fn with_worker_mode(mut self, mode: WorkerMode) -> Self {
        self.worker_mode = mode;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = millis(delay);
        self
    }

    pub fn with_queue_poll_interval(mut self, interval: Duration) -> Self {
        self.queue_poll_interval_ms = millis(interval);
        self
    }

    pub fn with_outbox_poll_interval(mut self, interval: Duration) -> Self {
        self.outbox_poll_interval_ms = millis(interval);
        self
    }

    pub fn with_outbox_batch_size(mut self, size: usize) -> Self {
        self.outbox_batch_size = size;
        self
    }

    pub fn with_outbox_lock_timeout(mut self, timeout: Duration) -> Self {
        self.outbox_lock_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_outbox_retry(mut self, policy: RetryPolicy) -> Self {
        self.outbox_retry = policy;
        self
    }

    pub fn with_relay_retry(mut self, policy: RetryPolicy) -> Self {
        self.relay_retry = policy;
        self
    }

    pub fn with_relay_max_attempts(mut self, max: Option<u32>) -> Self {
        self.relay_max_attempts = max;
        self
    }

    pub fn with_transport_wait(mut self, wait: Duration) -> Self {
        self.transport_wait_ms = millis(wait);
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_interval_ms)
    }

    pub fn outbox_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.outbox_lock_timeout_secs)
    }

    pub fn transport_wait(&self) -> Duration {
        Duration::from_millis(self.transport_wait_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
