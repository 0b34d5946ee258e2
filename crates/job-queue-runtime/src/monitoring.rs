//! Read-only monitoring surface for dashboards.
//!
//! Messages under a peek-lock are invisible to peeks, so fetched jobs can
//! never be listed and their count is unknown.

use crate::error::QueueError;
use crate::message::JobId;
use crate::registry::QueueClientRegistry;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;

/// Message counts for one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Messages waiting to be fetched
    pub enqueued_count: u64,
    /// Messages currently leased; `None` when the transport cannot tell
    pub fetched_count: Option<u64>,
}

/// Monitoring queries over the configured queues
pub struct MonitoringApi {
    registry: Arc<QueueClientRegistry>,
}

impl MonitoringApi {
    pub fn new(registry: Arc<QueueClientRegistry>) -> Self {
        Self { registry }
    }

    /// Configured logical queue names
    pub fn queues(&self) -> Vec<String> {
        self.registry.queues().to_vec()
    }

    /// One page of job ids waiting on `queue`, oldest first.
    ///
    /// Messages whose payload is not a numeric job id are skipped. Transports
    /// that cannot peek yield an empty page.
    pub async fn enqueued_job_ids(
        &self,
        queue: &str,
        from: usize,
        per_page: usize,
    ) -> Result<Vec<JobId>, QueueError> {
        let handle = self.registry.get_handle(queue).await?;
        let window = u32::try_from(from.saturating_add(per_page)).unwrap_or(u32::MAX);

        let messages = match handle.peek_messages(window).await {
            Ok(messages) => messages,
            Err(QueueError::Unsupported { provider, .. }) => {
                debug!(queue = queue, provider = %provider, "Transport cannot peek; returning empty page");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(messages
            .iter()
            .skip(from)
            .take(per_page)
            .filter_map(|message| message.job_id().ok())
            .filter(|job_id| job_id.as_str().parse::<u64>().is_ok())
            .collect())
    }

    /// Job ids currently leased from `queue`; always empty
    pub async fn fetched_job_ids(
        &self,
        queue: &str,
        _from: usize,
        _per_page: usize,
    ) -> Result<Vec<JobId>, QueueError> {
        self.registry.get_handle(queue).await?;
        Ok(Vec::new())
    }

    /// Enqueued count from the transport's runtime counters
    pub async fn enqueued_and_fetched_count(&self, queue: &str) -> Result<QueueCounts, QueueError> {
        let handle = self.registry.get_handle(queue).await?;
        let info = self
            .registry
            .provider()
            .administrator()
            .runtime_info(handle.queue_name())
            .await?;

        Ok(QueueCounts {
            enqueued_count: info.active_message_count,
            fetched_count: None,
        })
    }
}
