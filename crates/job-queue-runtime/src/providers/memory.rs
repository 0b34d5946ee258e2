//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory peek-lock queue that:
//! - Locks received messages for the queue's lock duration
//! - Returns messages with expired locks to the head of the queue
//! - Tracks delivery counts and dead-letters messages past the limit
//! - Blocks receivers until a message arrives or the timeout elapses
//! - Enlists sends in the ambient transaction, if one is active
//!
//! Queues must be created through the administrator before they are used,
//! mirroring a managed service where a missing entity is an error.

use crate::client::{MessageReceiver, QueueAdministrator, QueueHandle, QueueProvider};
use crate::error::QueueError;
use crate::message::{
    LockToken, Message, MessageId, PeekedMessage, QueueName, ReceiptHandle, ReceivedMessage,
    Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType, QueueDescription, QueueRuntimeInfo};
use crate::transaction::AmbientTransaction;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, Arc<InMemoryQueue>>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
        }
    }
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    state: Mutex<QueueState>,
    arrivals: Notify,
    lock_duration: Duration,
    max_delivery_count: u32,
    max_queue_size: usize,
}

#[derive(Default)]
struct QueueState {
    /// Messages available for receiving (FIFO order)
    ready: VecDeque<StoredMessage>,
    /// Locked messages keyed by lock token
    in_flight: HashMap<String, InFlightMessage>,
    /// Dead-letter sub-queue
    dead_letter: Vec<DeadLetteredMessage>,
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    enqueued_at: Timestamp,
    delivery_count: u32,
}

/// A message currently locked by a receiver
struct InFlightMessage {
    message: StoredMessage,
    locked_until: Timestamp,
}

impl InFlightMessage {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.locked_until
    }
}

struct DeadLetteredMessage {
    message: StoredMessage,
    reason: String,
}

impl InMemoryQueue {
    fn new(lock_duration: Duration, max_delivery_count: u32, max_queue_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
            lock_duration,
            max_delivery_count,
            max_queue_size,
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::ProviderError {
            provider: ProviderType::InMemory.to_string(),
            code: "StatePoisoned".to_string(),
            message: "queue state lock poisoned".to_string(),
        })
    }

    fn push(&self, message: StoredMessage) {
        if let Ok(mut state) = self.state.lock() {
            state.ready.push_back(message);
        }
        self.arrivals.notify_waiters();
    }

    /// Lock the next available message, returning expired locks to the queue first.
    fn try_lock_next(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut state = self.lock_state()?;
        reclaim_expired(&mut state);

        while let Some(mut message) = state.ready.pop_front() {
            message.delivery_count += 1;

            if message.delivery_count > self.max_delivery_count {
                debug!(
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    "Delivery limit exceeded; dead-lettering message"
                );
                state.dead_letter.push(DeadLetteredMessage {
                    message,
                    reason: "MaxDeliveryCountExceeded".to_string(),
                });
                continue;
            }

            let delivered_at = Timestamp::now();
            let locked_until = delivered_at.add(self.lock_duration);
            let lock_token = LockToken::generate();
            let received = ReceivedMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                receipt_handle: ReceiptHandle::new(
                    lock_token.clone(),
                    message.message_id.as_str().to_string(),
                    locked_until,
                    ProviderType::InMemory,
                ),
                delivery_count: message.delivery_count,
                enqueued_at: Some(message.enqueued_at),
                delivered_at,
            };

            state.in_flight.insert(
                lock_token.as_str().to_string(),
                InFlightMessage {
                    message,
                    locked_until,
                },
            );

            return Ok(Some(received));
        }

        Ok(None)
    }

    /// Take the locked message for `receipt`, failing if the lock is gone.
    fn take_locked(
        &self,
        state: &mut QueueState,
        receipt: &ReceiptHandle,
    ) -> Result<StoredMessage, QueueError> {
        let token = receipt.lock_token().as_str();
        match state.in_flight.remove(token) {
            Some(in_flight) if !in_flight.is_expired() => Ok(in_flight.message),
            Some(expired) => {
                // The lock lapsed; the message becomes available again.
                state.ready.push_front(expired.message);
                self.arrivals.notify_waiters();
                Err(QueueError::MessageLockLost {
                    lock_token: token.to_string(),
                })
            }
            None => Err(QueueError::MessageLockLost {
                lock_token: token.to_string(),
            }),
        }
    }
}

fn reclaim_expired(state: &mut QueueState) {
    let expired: Vec<String> = state
        .in_flight
        .iter()
        .filter(|(_, in_flight)| in_flight.is_expired())
        .map(|(token, _)| token.clone())
        .collect();

    for token in expired {
        if let Some(in_flight) = state.in_flight.remove(&token) {
            state.ready.push_front(in_flight.message);
        }
    }
}

fn lookup_queue(
    storage: &RwLock<QueueStorage>,
    queue_name: &QueueName,
) -> Result<Arc<InMemoryQueue>, QueueError> {
    let storage = storage.read().map_err(|_| QueueError::ProviderError {
        provider: ProviderType::InMemory.to_string(),
        code: "StatePoisoned".to_string(),
        message: "queue storage lock poisoned".to_string(),
    })?;

    storage
        .queues
        .get(queue_name)
        .cloned()
        .ok_or_else(|| QueueError::QueueNotFound {
            queue_name: queue_name.as_str().to_string(),
        })
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
#[derive(Clone)]
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config))),
        }
    }

    /// Create a queue with the provider's default lock duration and delivery limit.
    pub fn ensure_queue(&self, queue_name: &QueueName) -> Result<(), QueueError> {
        let (lock_duration, max_delivery_count) = {
            let storage = self.storage.read().map_err(|_| poisoned())?;
            (
                Duration::from_secs(storage.config.default_lock_duration_seconds),
                storage.config.default_max_delivery_count,
            )
        };
        self.insert_queue(queue_name, lock_duration, max_delivery_count)
    }

    /// Ids and reasons of the messages in a queue's dead-letter sub-queue.
    pub fn dead_lettered(
        &self,
        queue_name: &QueueName,
    ) -> Result<Vec<(MessageId, String)>, QueueError> {
        let queue = lookup_queue(&self.storage, queue_name)?;
        let state = queue.lock_state()?;
        Ok(state
            .dead_letter
            .iter()
            .map(|entry| (entry.message.message_id.clone(), entry.reason.clone()))
            .collect())
    }

    fn insert_queue(
        &self,
        queue_name: &QueueName,
        lock_duration: Duration,
        max_delivery_count: u32,
    ) -> Result<(), QueueError> {
        let mut storage = self.storage.write().map_err(|_| poisoned())?;
        let max_queue_size = storage.config.max_queue_size;
        storage
            .queues
            .entry(queue_name.clone())
            .or_insert_with(|| {
                Arc::new(InMemoryQueue::new(
                    lock_duration,
                    max_delivery_count,
                    max_queue_size,
                ))
            });
        Ok(())
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

fn poisoned() -> QueueError {
    QueueError::ProviderError {
        provider: ProviderType::InMemory.to_string(),
        code: "StatePoisoned".to_string(),
        message: "queue storage lock poisoned".to_string(),
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn open_queue(&self, queue: &QueueName) -> Result<Arc<dyn QueueHandle>, QueueError> {
        Ok(Arc::new(InMemoryQueueHandle {
            storage: Arc::clone(&self.storage),
            queue_name: queue.clone(),
        }))
    }

    fn administrator(&self) -> Arc<dyn QueueAdministrator> {
        Arc::new(self.clone())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

#[async_trait]
impl QueueAdministrator for InMemoryProvider {
    async fn queue_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        Ok(storage.queues.contains_key(queue))
    }

    async fn create_queue(&self, description: &QueueDescription) -> Result<(), QueueError> {
        self.insert_queue(
            &description.name,
            description.lock_duration,
            description.max_delivery_count,
        )
    }

    async fn runtime_info(&self, queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError> {
        let queue = lookup_queue(&self.storage, queue)?;
        let state = queue.lock_state()?;
        Ok(QueueRuntimeInfo {
            active_message_count: (state.ready.len() + state.in_flight.len()) as u64,
            dead_letter_message_count: state.dead_letter.len() as u64,
        })
    }
}

// ============================================================================
// Handle and Receiver
// ============================================================================

/// Handle bound to one in-memory queue
pub struct InMemoryQueueHandle {
    storage: Arc<RwLock<QueueStorage>>,
    queue_name: QueueName,
}

#[async_trait]
impl QueueHandle for InMemoryQueueHandle {
    fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    async fn send_message(&self, message: &Message) -> Result<MessageId, QueueError> {
        let queue = lookup_queue(&self.storage, &self.queue_name)?;

        let max_size = ProviderType::InMemory.max_message_size();
        if message.body.len() > max_size {
            return Err(QueueError::ProviderError {
                provider: ProviderType::InMemory.to_string(),
                code: "MessageTooLarge".to_string(),
                message: format!("{} bytes exceeds {} bytes", message.body.len(), max_size),
            });
        }

        {
            let state = queue.lock_state()?;
            if state.ready.len() + state.in_flight.len() >= queue.max_queue_size {
                return Err(QueueError::ProviderError {
                    provider: ProviderType::InMemory.to_string(),
                    code: "QueueFull".to_string(),
                    message: format!("queue {} is full", self.queue_name),
                });
            }
        }

        let stored = StoredMessage {
            message_id: message.message_id.clone(),
            body: message.body.clone(),
            enqueued_at: Timestamp::now(),
            delivery_count: 0,
        };

        match AmbientTransaction::current() {
            Some(transaction) => {
                debug!(
                    queue = %self.queue_name,
                    transaction_id = %transaction.id(),
                    "Enlisting send in ambient transaction"
                );
                let target = Arc::clone(&queue);
                if !transaction.enlist(move || target.push(stored)) {
                    warn!(
                        queue = %self.queue_name,
                        transaction_id = %transaction.id(),
                        "Ambient transaction already completed; message discarded"
                    );
                }
            }
            None => queue.push(stored),
        }

        Ok(message.message_id.clone())
    }

    fn create_receiver(&self) -> Arc<dyn MessageReceiver> {
        Arc::new(InMemoryReceiver {
            storage: Arc::clone(&self.storage),
            queue_name: self.queue_name.clone(),
        })
    }

    async fn peek_messages(&self, max_messages: u32) -> Result<Vec<PeekedMessage>, QueueError> {
        let queue = lookup_queue(&self.storage, &self.queue_name)?;
        let mut state = queue.lock_state()?;
        reclaim_expired(&mut state);

        Ok(state
            .ready
            .iter()
            .take(max_messages as usize)
            .map(|message| PeekedMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                enqueued_at: Some(message.enqueued_at),
            })
            .collect())
    }
}

/// Peek-lock receiver over one in-memory queue
pub struct InMemoryReceiver {
    storage: Arc<RwLock<QueueStorage>>,
    queue_name: QueueName,
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn receive_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let queue = lookup_queue(&self.storage, &self.queue_name)?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a concurrent send is not missed.
            let arrival = queue.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(message) = queue.try_lock_next()? {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let queue = lookup_queue(&self.storage, &self.queue_name)?;
        let mut state = queue.lock_state()?;
        queue.take_locked(&mut state, receipt)?;
        Ok(())
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let queue = lookup_queue(&self.storage, &self.queue_name)?;
        {
            let mut state = queue.lock_state()?;
            let message = queue.take_locked(&mut state, receipt)?;
            state.ready.push_front(message);
        }
        queue.arrivals.notify_waiters();
        Ok(())
    }

    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError> {
        let queue = lookup_queue(&self.storage, &self.queue_name)?;
        let mut state = queue.lock_state()?;
        let message = queue.take_locked(&mut state, receipt)?;
        state.dead_letter.push(DeadLetteredMessage {
            message,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn renew_message_lock(&self, receipt: &ReceiptHandle) -> Result<Timestamp, QueueError> {
        let queue = lookup_queue(&self.storage, &self.queue_name)?;
        let mut state = queue.lock_state()?;
        let token = receipt.lock_token().as_str();

        match state.in_flight.get_mut(token) {
            Some(in_flight) if !in_flight.is_expired() => {
                in_flight.locked_until = Timestamp::now().add(queue.lock_duration);
                Ok(in_flight.locked_until)
            }
            _ => Err(QueueError::MessageLockLost {
                lock_token: token.to_string(),
            }),
        }
    }
}
