//! Provider types and configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    ServiceBus,
    InMemory,
}

impl ProviderType {
    /// Check if provider can move messages to a dead-letter sub-queue
    pub fn supports_dead_letter(&self) -> bool {
        match self {
            Self::ServiceBus => false, // Not exposed by the REST interface
            Self::InMemory => true,
        }
    }

    /// Check if provider can peek messages without locking them
    pub fn supports_peek(&self) -> bool {
        match self {
            Self::ServiceBus => false,
            Self::InMemory => true,
        }
    }

    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::ServiceBus => 256 * 1024,    // 256KB (standard tier)
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceBus => write!(f, "ServiceBus"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Settings applied when a queue is created administratively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDescriptionOptions {
    /// Peek-lock duration granted on receive, in seconds
    pub lock_duration_seconds: u64,

    /// Deliveries after which a message is dead-lettered
    pub max_delivery_count: u32,

    /// Enable duplicate detection on the queue (left to the service default when unset)
    pub requires_duplicate_detection: Option<bool>,
}

impl Default for QueueDescriptionOptions {
    fn default() -> Self {
        Self {
            lock_duration_seconds: 60,
            max_delivery_count: 10,
            requires_duplicate_detection: None,
        }
    }
}

impl QueueDescriptionOptions {
    /// Lock duration as a [`Duration`]
    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_seconds)
    }
}

/// Description of a queue to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescription {
    pub name: crate::message::QueueName,
    pub lock_duration: Duration,
    pub max_delivery_count: u32,
    pub requires_duplicate_detection: Option<bool>,
}

impl QueueDescription {
    /// Build a description for `name` from configured defaults
    pub fn new(name: crate::message::QueueName, options: &QueueDescriptionOptions) -> Self {
        Self {
            name,
            lock_duration: options.lock_duration(),
            max_delivery_count: options.max_delivery_count,
            requires_duplicate_detection: options.requires_duplicate_detection,
        }
    }
}

/// Runtime counters reported for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueRuntimeInfo {
    pub active_message_count: u64,
    pub dead_letter_message_count: u64,
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
    /// Lock duration for queues created without an explicit description, in seconds
    pub default_lock_duration_seconds: u64,
    /// Delivery limit for queues created without an explicit description
    pub default_max_delivery_count: u32,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            default_lock_duration_seconds: 60,
            default_max_delivery_count: 10,
        }
    }
}

/// Service bus REST transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceBusConfig {
    /// Connection string: `Endpoint=sb://…;SharedAccessKeyName=…;SharedAccessKey=…`
    pub connection_string: String,

    /// Lifetime of generated shared access signatures, in seconds
    pub token_ttl_seconds: u64,

    /// Extra time allowed on top of the receive timeout before the HTTP call is abandoned
    pub http_grace_seconds: u64,
}

impl Default for ServiceBusConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            token_ttl_seconds: 3600,
            http_grace_seconds: 10,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
