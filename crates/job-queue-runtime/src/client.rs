//! Transport traits consumed by the job queue.
//!
//! A [`QueueProvider`] hands out one [`QueueHandle`] per transport queue. A
//! handle sends messages and produces fresh [`MessageReceiver`] cursors; a
//! receiver performs peek-lock receives and the per-message operations on
//! whatever it received. Administrative calls live on [`QueueAdministrator`].

use crate::error::QueueError;
use crate::message::{
    Message, MessageId, PeekedMessage, QueueName, ReceiptHandle, ReceivedMessage, Timestamp,
};
use crate::provider::{ProviderType, QueueDescription, QueueRuntimeInfo};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Interface implemented by specific queue transports
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Bind a handle to one transport queue
    async fn open_queue(&self, queue: &QueueName) -> Result<Arc<dyn QueueHandle>, QueueError>;

    /// Administrative collaborator for this transport
    fn administrator(&self) -> Arc<dyn QueueAdministrator>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Live binding to one transport queue
#[async_trait]
pub trait QueueHandle: Send + Sync {
    /// Transport name of the bound queue
    fn queue_name(&self) -> &QueueName;

    /// Send single message
    async fn send_message(&self, message: &Message) -> Result<MessageId, QueueError>;

    /// Create a fresh receive cursor in peek-lock mode
    fn create_receiver(&self) -> Arc<dyn MessageReceiver>;

    /// Look at up to `max_messages` messages from the head without locking them
    async fn peek_messages(&self, max_messages: u32) -> Result<Vec<PeekedMessage>, QueueError>;
}

/// Peek-lock receive cursor and the per-message operations on what it received
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Receive one message, waiting at most `timeout`.
    ///
    /// `Ok(None)` and [`QueueError::Timeout`] both mean that no message is
    /// currently available.
    async fn receive_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Remove the message from the queue
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Release the lock so the message can be received again
    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Move the message to the dead-letter sub-queue
    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Extend the lock, returning the new expiry
    async fn renew_message_lock(&self, receipt: &ReceiptHandle) -> Result<Timestamp, QueueError>;
}

/// Administrative queue operations (existence, creation, runtime counters)
#[async_trait]
pub trait QueueAdministrator: Send + Sync {
    /// Check whether the queue exists
    async fn queue_exists(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Create a queue
    async fn create_queue(&self, description: &QueueDescription) -> Result<(), QueueError>;

    /// Fetch runtime counters for a queue
    async fn runtime_info(&self, queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError>;
}
