//! Enqueue path: announces a persisted job on its queue.
//!
//! The send runs outside any ambient transaction. Once [`SendPath::enqueue`]
//! returns `Ok`, the message is on the queue whether or not the caller's
//! transaction later commits; the job host tolerates fetching a job whose
//! record was never written. Timeout-class failures are retried under the
//! configured [`RetryPolicy`].

use crate::error::QueueError;
use crate::message::{JobId, Message, MessageId};
use crate::registry::QueueClientRegistry;
use crate::retry::RetryPolicy;
use crate::transaction;
use std::sync::Arc;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "send_tests.rs"]
mod tests;

/// Sends job announcements through the registry's handles
pub struct SendPath {
    registry: Arc<QueueClientRegistry>,
    policy: RetryPolicy,
}

impl SendPath {
    pub fn new(registry: Arc<QueueClientRegistry>, policy: RetryPolicy) -> Self {
        Self { registry, policy }
    }

    /// Retry policy applied to every send
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send a message carrying `job_id` to the logical queue `queue`.
    ///
    /// # Errors
    ///
    /// - [`QueueError::QueueNotConfigured`] if `queue` is not configured
    /// - the last [`QueueError::Timeout`] once all attempts timed out
    /// - any other transport error from the first attempt that raised it
    #[instrument(skip_all, fields(queue = %queue, job_id = %job_id))]
    pub async fn enqueue(&self, queue: &str, job_id: &JobId) -> Result<MessageId, QueueError> {
        let handle = self.registry.get_handle(queue).await?;
        let message = Message::for_job(job_id);

        let message_id =
            transaction::suppress(self.policy.execute(|| handle.send_message(&message))).await?;

        debug!(
            message_id = %message_id,
            transport_queue = %handle.queue_name(),
            "Enqueued job"
        );
        Ok(message_id)
    }
}
