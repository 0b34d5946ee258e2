//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use crate::provider::ProviderType;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated transport-level queue name.
///
/// Logical queue names supplied by the job host are mapped to transport names
/// by prepending the configured prefix, see [`QueueName::with_prefix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores and periods allowed"
                    .to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Map a logical queue name onto its transport name: `prefix + logical_name`.
    pub fn with_prefix(prefix: &str, logical_name: &str) -> Result<Self, ValidationError> {
        Self::new(format!("{}{}", prefix, logical_name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Identifier of a background job, carried as the UTF-8 message payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Create a job id, rejecting empty values
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "job_id".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Decode a job id from a message payload.
    pub fn from_payload(body: &[u8]) -> Result<Self, SerializationError> {
        let text = std::str::from_utf8(body).map_err(|_| SerializationError::InvalidUtf8)?;
        Ok(Self(text.to_string()))
    }

    /// Encode the job id as a message payload.
    pub fn to_payload(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }

    /// Get job id as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token naming the lock a complete/abandon/renew call targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh random lock token
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap a token issued by the transport
    pub fn from_transport(token: String) -> Self {
        Self(token)
    }

    /// Get lock token as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp `duration` after this one.
    pub fn add(&self, duration: Duration) -> Self {
        match chrono::Duration::from_std(duration) {
            Ok(delta) => Self(self.0 + delta),
            Err(_) => Self(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Time from now until this timestamp, zero if it lies in the past.
    pub fn duration_from_now(&self) -> Duration {
        (self.0 - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue system
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: MessageId,
    pub body: Bytes,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            message_id: MessageId::new(),
            body,
        }
    }

    /// Create the message announcing a job: the payload is the UTF-8 job id.
    pub fn for_job(job_id: &JobId) -> Self {
        Self::new(job_id.to_payload())
    }

    /// Override the generated message id
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub receipt_handle: ReceiptHandle,
    pub delivery_count: u32,
    pub enqueued_at: Option<Timestamp>,
    pub delivered_at: Timestamp,
}

impl ReceivedMessage {
    /// Decode the job id carried by this message.
    pub fn job_id(&self) -> Result<JobId, SerializationError> {
        JobId::from_payload(&self.body)
    }

    /// Lock duration granted at delivery time.
    pub fn lock_duration(&self) -> Duration {
        (self.receipt_handle.locked_until().as_datetime() - self.delivered_at.as_datetime())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// A message observed without taking a lock on it
#[derive(Debug, Clone)]
pub struct PeekedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub enqueued_at: Option<Timestamp>,
}

impl PeekedMessage {
    /// Decode the job id carried by this message.
    pub fn job_id(&self) -> Result<JobId, SerializationError> {
        JobId::from_payload(&self.body)
    }
}

/// Peek-lock receipt: lock token, lock expiry, and the provider-specific
/// reference used to address the locked message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    lock_token: LockToken,
    message_ref: String,
    locked_until: Timestamp,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(
        lock_token: LockToken,
        message_ref: String,
        locked_until: Timestamp,
        provider_type: ProviderType,
    ) -> Self {
        Self {
            lock_token,
            message_ref,
            locked_until,
            provider_type,
        }
    }

    /// Get the lock token
    pub fn lock_token(&self) -> &LockToken {
        &self.lock_token
    }

    /// Provider-specific message reference (a message URI for the service bus
    /// transport, the message id for the in-memory one).
    pub fn message_ref(&self) -> &str {
        &self.message_ref
    }

    /// Lock expiry as last reported by the transport
    pub fn locked_until(&self) -> Timestamp {
        self.locked_until
    }

    /// Record a renewed lock expiry
    pub fn set_locked_until(&mut self, locked_until: Timestamp) {
        self.locked_until = locked_until;
    }

    /// Check if the lock has expired
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.locked_until
    }

    /// Get time until expiry
    pub fn time_until_expiry(&self) -> Duration {
        self.locked_until.duration_from_now()
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
