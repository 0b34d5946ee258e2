//! Configuration for the job queue.
//!
//! Sources (applied in order, later sources override earlier ones):
//!  1. An optional configuration file; the format follows the file extension
//!     (`.yaml`, `.toml`, `.json`)
//!  2. Environment variables prefixed `JOBQ__` with a double-underscore
//!     separator, e.g. `JOBQ__RETRY__ATTEMPTS=5` sets `retry.attempts = 5`.
//!     `JOBQ__QUEUES` takes a comma separated list.
//!
//! Every field carries a serde default, so an absent file and an empty
//! environment produce the built-in defaults.

use crate::error::{ConfigurationError, ValidationError};
use crate::fetch::ReceiveTimeoutPolicy;
use crate::message::QueueName;
use crate::provider::{InMemoryConfig, ProviderType, QueueDescriptionOptions};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "JOBQ";

/// Job queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobQueueOptions {
    /// Transport to use
    pub provider: ProviderType,

    /// Service bus connection string (service bus transport only)
    pub connection_string: String,

    /// Prefix prepended to every logical queue name
    pub queue_prefix: String,

    /// Logical queue names, in fetch rotation order
    pub queues: Vec<String>,

    /// Verify each queue exists on first use and create it when missing
    pub check_and_create_queues: bool,

    /// Settings for administratively created queues
    pub queue_description: QueueDescriptionOptions,

    /// Receive timeout for the last queue in the rotation, in milliseconds
    pub loop_receive_timeout_ms: u64,

    /// Receive timeout for every other queue in the rotation, in milliseconds
    pub poll_receive_timeout_ms: u64,

    /// Delay after every single-queue receive attempt, in milliseconds
    pub poll_delay_ms: u64,

    /// Fixed lock renewal interval; when absent the interval is derived from
    /// the lock expiry of each message
    pub lock_renewal_delay_ms: Option<u64>,

    /// Send retry settings
    pub retry: RetryOptions,

    /// In-memory transport settings
    pub in_memory: InMemoryConfig,

    /// Lifetime of generated shared access signatures, in seconds
    pub token_ttl_seconds: u64,
}

impl Default for JobQueueOptions {
    fn default() -> Self {
        Self {
            provider: ProviderType::ServiceBus,
            connection_string: String::new(),
            queue_prefix: String::new(),
            queues: vec!["default".to_string()],
            check_and_create_queues: true,
            queue_description: QueueDescriptionOptions::default(),
            loop_receive_timeout_ms: 5000,
            poll_receive_timeout_ms: 1,
            poll_delay_ms: 100,
            lock_renewal_delay_ms: None,
            retry: RetryOptions::default(),
            in_memory: InMemoryConfig::default(),
            token_ttl_seconds: 3600,
        }
    }
}

/// Retry settings for timeout-class send failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Total number of attempts
    pub attempts: u32,

    /// Delay between attempts, in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl JobQueueOptions {
    /// Load options from an optional file and the `JOBQ__` environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Parsing`] when the file cannot be read or
    /// a value cannot be coerced to its field type.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("queues")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        config
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })
    }

    /// Validate the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] for an empty or duplicated queue
    /// list, a queue whose transport name is invalid, zero retry attempts, a
    /// zero lock renewal delay, or a missing connection string for the service
    /// bus transport.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.queues.is_empty() {
            return Err(invalid("at least one queue must be configured"));
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            if !seen.insert(queue.as_str()) {
                return Err(invalid(&format!("queue '{}' is configured twice", queue)));
            }
            self.transport_queue_name(queue)
                .map_err(|e| invalid(&format!("queue '{}': {}", queue, e)))?;
        }

        self.retry_policy().map_err(|e| invalid(&e.to_string()))?;

        if self.lock_renewal_delay_ms == Some(0) {
            return Err(invalid("lock_renewal_delay_ms must be greater than zero"));
        }

        if self.provider == ProviderType::ServiceBus && self.connection_string.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "connection_string".to_string(),
            });
        }

        Ok(())
    }

    /// Transport name for a logical queue: `queue_prefix + logical_name`
    pub fn transport_queue_name(&self, logical_name: &str) -> Result<QueueName, ValidationError> {
        QueueName::with_prefix(&self.queue_prefix, logical_name)
    }

    /// Send retry policy
    pub fn retry_policy(&self) -> Result<RetryPolicy, ValidationError> {
        RetryPolicy::new(
            self.retry.attempts,
            Duration::from_millis(self.retry.delay_ms),
        )
    }

    /// Per-position receive timeouts for the fetch rotation
    pub fn receive_timeouts(&self) -> ReceiveTimeoutPolicy {
        ReceiveTimeoutPolicy::new(
            Duration::from_millis(self.poll_receive_timeout_ms),
            Duration::from_millis(self.loop_receive_timeout_ms),
        )
    }

    /// Delay after every single-queue receive attempt
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    /// Fixed lock renewal interval, if configured
    pub fn lock_renewal_delay(&self) -> Option<Duration> {
        self.lock_renewal_delay_ms.map(Duration::from_millis)
    }
}

fn invalid(message: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: message.to_string(),
    }
}
