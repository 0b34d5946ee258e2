//! Registry of queue handles keyed by logical queue name.
//!
//! The registry resolves a logical queue name (as used by the job host) to the
//! [`QueueHandle`] bound to its transport queue. Handles for *all* configured
//! queues are built together the first time any handle is requested, exactly
//! once even under concurrent first use. When `check_and_create_queues` is
//! enabled, each queue is verified through the [`QueueAdministrator`] and
//! created if it is missing.

use crate::client::{QueueHandle, QueueProvider};
use crate::error::QueueError;
use crate::message::QueueName;
use crate::options::JobQueueOptions;
use crate::provider::{QueueDescription, QueueDescriptionOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Owns one queue handle per configured logical queue
pub struct QueueClientRegistry {
    provider: Arc<dyn QueueProvider>,
    queue_prefix: String,
    queues: Vec<String>,
    check_and_create_queues: bool,
    queue_description: QueueDescriptionOptions,
    handles: OnceCell<HashMap<String, Arc<dyn QueueHandle>>>,
}

impl QueueClientRegistry {
    /// Create a registry for the queues named in `options`
    pub fn new(provider: Arc<dyn QueueProvider>, options: &JobQueueOptions) -> Self {
        Self {
            provider,
            queue_prefix: options.queue_prefix.clone(),
            queues: options.queues.clone(),
            check_and_create_queues: options.check_and_create_queues,
            queue_description: options.queue_description.clone(),
            handles: OnceCell::new(),
        }
    }

    /// Configured logical queue names, in configuration order
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// The transport behind every handle
    pub fn provider(&self) -> &Arc<dyn QueueProvider> {
        &self.provider
    }

    /// Transport name for a logical queue: `queue_prefix + logical_name`
    pub fn transport_name(&self, logical_name: &str) -> Result<QueueName, QueueError> {
        Ok(QueueName::with_prefix(&self.queue_prefix, logical_name)?)
    }

    /// Resolve the handle for a logical queue name.
    ///
    /// # Errors
    ///
    /// - [`QueueError::QueueNotConfigured`] if `name` is not a configured queue
    /// - [`QueueError::ManagePermissionRequired`] if verifying or creating a
    ///   queue was denied
    /// - any transport error raised while building the handles; the build is
    ///   attempted again on the next call
    pub async fn get_handle(&self, name: &str) -> Result<Arc<dyn QueueHandle>, QueueError> {
        let handles = self
            .handles
            .get_or_try_init(|| self.build_handles())
            .await?;

        handles
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotConfigured {
                queue: name.to_string(),
            })
    }

    async fn build_handles(&self) -> Result<HashMap<String, Arc<dyn QueueHandle>>, QueueError> {
        let mut handles = HashMap::with_capacity(self.queues.len());

        for logical_name in &self.queues {
            let queue_name = self.transport_name(logical_name)?;

            if self.check_and_create_queues {
                self.ensure_queue(&queue_name).await?;
            }

            let handle = self.provider.open_queue(&queue_name).await?;
            handles.insert(logical_name.clone(), handle);
        }

        debug!(
            queue_count = handles.len(),
            provider = %self.provider.provider_type(),
            "Built queue handles"
        );
        Ok(handles)
    }

    async fn ensure_queue(&self, queue_name: &QueueName) -> Result<(), QueueError> {
        let administrator = self.provider.administrator();

        let exists = administrator
            .queue_exists(queue_name)
            .await
            .map_err(|e| require_manage(e, queue_name))?;
        if exists {
            return Ok(());
        }

        info!(queue = %queue_name, "Queue does not exist; creating it");
        let description = QueueDescription::new(queue_name.clone(), &self.queue_description);
        administrator
            .create_queue(&description)
            .await
            .map_err(|e| require_manage(e, queue_name))
    }
}

/// A denied administrative call means the credentials lack the Manage right.
fn require_manage(error: QueueError, queue_name: &QueueName) -> QueueError {
    match error {
        QueueError::PermissionDenied { .. } => QueueError::ManagePermissionRequired {
            queue_name: queue_name.as_str().to_string(),
        },
        other => other,
    }
}
