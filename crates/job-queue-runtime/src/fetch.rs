//! Round-robin fetch loop across several queues.
//!
//! Each iteration performs one bounded receive against the queue at the
//! current rotation position. Every queue but the last is polled with a
//! near-zero timeout; the last queue is where the loop parks, waiting with the
//! long timeout. A fixed delay follows every iteration.
//!
//! ```text
//! [A: poll] -> delay -> [B: poll] -> delay -> [C: park] -> delay -> [A: poll] ...
//! ```

use crate::client::{MessageReceiver, QueueHandle};
use crate::error::{QueueError, ValidationError};
use crate::lease::{FetchedJob, RenewalSchedule};
use crate::message::ReceivedMessage;
use crate::observer::{LeaseObserver, TracingLeaseObserver};
use crate::options::JobQueueOptions;
use crate::registry::QueueClientRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;

/// Per-position receive timeouts for the rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveTimeoutPolicy {
    poll_timeout: Duration,
    park_timeout: Duration,
}

impl Default for ReceiveTimeoutPolicy {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1),
            park_timeout: Duration::from_secs(5),
        }
    }
}

impl ReceiveTimeoutPolicy {
    /// `poll_timeout` for every position but the last, `park_timeout` for the last
    pub fn new(poll_timeout: Duration, park_timeout: Duration) -> Self {
        Self {
            poll_timeout,
            park_timeout,
        }
    }

    /// Timeout for the receive at `position` in a rotation of `queue_count` queues
    pub fn timeout_for(&self, position: usize, queue_count: usize) -> Duration {
        if position + 1 >= queue_count {
            self.park_timeout
        } else {
            self.poll_timeout
        }
    }
}

/// Produces leases by polling the configured queues in rotation
pub struct FetchLoop {
    registry: Arc<QueueClientRegistry>,
    timeouts: ReceiveTimeoutPolicy,
    poll_delay: Duration,
    renewal: RenewalSchedule,
    observer: Arc<dyn LeaseObserver>,
}

impl FetchLoop {
    /// Create a fetch loop with timings taken from `options`
    pub fn new(registry: Arc<QueueClientRegistry>, options: &JobQueueOptions) -> Self {
        Self {
            registry,
            timeouts: options.receive_timeouts(),
            poll_delay: options.poll_delay(),
            renewal: RenewalSchedule::from_delay(options.lock_renewal_delay()),
            observer: Arc::new(TracingLeaseObserver),
        }
    }

    /// Report lock renewal outcomes to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn LeaseObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Block until a job is available on one of `queues` or `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Cancelled`] once `cancel` is signalled, including while
    ///   queue handles are being built or a receive is in flight
    /// - [`QueueError::QueueMissing`] on the first receive against a queue that
    ///   does not exist; this is never retried
    /// - any other transport error, unchanged
    pub async fn dequeue(
        &self,
        queues: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchedJob, QueueError> {
        if queues.is_empty() {
            return Err(ValidationError::Required {
                field: "queues".to_string(),
            }
            .into());
        }

        let mut handles: Vec<(&str, Arc<dyn QueueHandle>)> = Vec::with_capacity(queues.len());
        for queue in queues {
            let handle = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                handle = self.registry.get_handle(queue) => handle?,
            };
            handles.push((queue.as_str(), handle));
        }

        let mut position = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            let (queue, handle) = &handles[position];
            let timeout = self.timeouts.timeout_for(position, handles.len());
            let receiver = handle.create_receiver();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                outcome = receiver.receive_message(timeout) => outcome,
            };

            match outcome {
                Ok(Some(message)) => {
                    if let Some(job) = self.lease(queue, message, receiver).await {
                        return Ok(job);
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_timeout() => {}
                Err(QueueError::QueueNotFound { .. }) => {
                    let queue_name = handle.queue_name().as_str().to_string();
                    error!(queue = %queue_name, "Queue does not exist");
                    return Err(QueueError::QueueMissing { queue_name });
                }
                Err(e) => return Err(e),
            }

            position = (position + 1) % handles.len();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = tokio::time::sleep(self.poll_delay) => {}
            }
        }
    }

    /// Wrap a received message in a lease, or set it aside if its payload is
    /// not a job id.
    async fn lease(
        &self,
        queue: &str,
        message: ReceivedMessage,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Option<FetchedJob> {
        match message.job_id() {
            Ok(job_id) => {
                debug!(
                    job_id = %job_id,
                    queue = queue,
                    delivery_count = message.delivery_count,
                    "Fetched job"
                );
                Some(FetchedJob::start(
                    job_id,
                    queue,
                    message,
                    receiver,
                    self.renewal,
                    Arc::clone(&self.observer),
                ))
            }
            Err(e) => {
                warn!(
                    queue = queue,
                    message_id = %message.message_id,
                    error = %e,
                    "Message payload is not a job id; setting it aside"
                );
                self.reject(&message, receiver.as_ref()).await;
                None
            }
        }
    }

    async fn reject(&self, message: &ReceivedMessage, receiver: &dyn MessageReceiver) {
        let receipt = &message.receipt_handle;
        let result = if receipt.provider_type().supports_dead_letter() {
            receiver
                .dead_letter_message(receipt, "InvalidJobIdPayload")
                .await
        } else {
            // The transport dead-letters it after the delivery limit.
            receiver.abandon_message(receipt).await
        };

        if let Err(e) = result {
            warn!(
                message_id = %message.message_id,
                provider = %receipt.provider_type(),
                error = %e,
                "Failed to set aside invalid message"
            );
        }
    }
}
