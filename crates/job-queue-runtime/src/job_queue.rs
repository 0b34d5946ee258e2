//! Job host integration: the persistent job queue and its wiring.
//!
//! A job host sees two operations. `enqueue` announces a persisted job on a
//! queue; `dequeue` blocks until a job is available and hands back a
//! [`FetchedJob`] lease that the host must settle exactly once.
//!
//! [`JobQueueProvider`] builds everything from [`JobQueueOptions`]: the
//! transport, the shared [`QueueClientRegistry`], the job queue and the
//! [`MonitoringApi`].

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::fetch::FetchLoop;
use crate::lease::FetchedJob;
use crate::message::{JobId, MessageId};
use crate::monitoring::MonitoringApi;
use crate::observer::LeaseObserver;
use crate::options::JobQueueOptions;
use crate::provider::{ProviderType, ServiceBusConfig};
use crate::providers::{InMemoryProvider, ServiceBusProvider};
use crate::registry::QueueClientRegistry;
use crate::send::SendPath;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(test)]
#[path = "job_queue_tests.rs"]
mod tests;

/// Queue contract consumed by a background job host
#[async_trait]
pub trait PersistentJobQueue: Send + Sync {
    /// Wait for the next job on any of `queues`, in rotation order
    async fn dequeue(
        &self,
        queues: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchedJob, QueueError>;

    /// Announce `job_id` on the logical queue `queue`
    async fn enqueue(&self, queue: &str, job_id: &JobId) -> Result<MessageId, QueueError>;
}

/// Job queue over a peek-lock message transport
pub struct ServiceBusJobQueue {
    fetch: FetchLoop,
    send: SendPath,
}

impl ServiceBusJobQueue {
    pub fn new(
        registry: Arc<QueueClientRegistry>,
        options: &JobQueueOptions,
    ) -> Result<Self, QueueError> {
        let policy = options.retry_policy()?;
        Ok(Self {
            fetch: FetchLoop::new(Arc::clone(&registry), options),
            send: SendPath::new(registry, policy),
        })
    }

    /// Report lock renewal outcomes to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn LeaseObserver>) -> Self {
        self.fetch = self.fetch.with_observer(observer);
        self
    }
}

#[async_trait]
impl PersistentJobQueue for ServiceBusJobQueue {
    async fn dequeue(
        &self,
        queues: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchedJob, QueueError> {
        self.fetch.dequeue(queues, cancel).await
    }

    async fn enqueue(&self, queue: &str, job_id: &JobId) -> Result<MessageId, QueueError> {
        self.send.enqueue(queue, job_id).await
    }
}

/// Everything a job host needs, built from one set of options
pub struct JobQueueProvider {
    options: JobQueueOptions,
    registry: Arc<QueueClientRegistry>,
    job_queue: Arc<ServiceBusJobQueue>,
    monitoring: Arc<MonitoringApi>,
}

impl JobQueueProvider {
    /// Validate `options` and build the configured transport.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid options or an unparsable
    /// connection string. No network call is made here; queues are checked on
    /// first use.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use job_queue_runtime::{
    ///     CancellationToken, JobId, JobQueueOptions, JobQueueProvider, PersistentJobQueue,
    ///     ProviderType,
    /// };
    ///
    /// # tokio_test::block_on(async {
    /// let options = JobQueueOptions {
    ///     provider: ProviderType::InMemory,
    ///     queues: vec!["default".to_string()],
    ///     ..Default::default()
    /// };
    /// let provider = JobQueueProvider::from_options(options).unwrap();
    /// let queue = provider.job_queue();
    ///
    /// queue.enqueue("default", &JobId::new("42").unwrap()).await.unwrap();
    /// let job = queue
    ///     .dequeue(&["default".to_string()], &CancellationToken::new())
    ///     .await
    ///     .unwrap();
    /// assert_eq!(job.job_id().as_str(), "42");
    /// job.remove_from_queue().await.unwrap();
    /// # });
    /// ```
    pub fn from_options(options: JobQueueOptions) -> Result<Self, QueueError> {
        options.validate()?;

        let provider: Arc<dyn QueueProvider> = match options.provider {
            ProviderType::InMemory => {
                let provider = InMemoryProvider::new(options.in_memory.clone());
                // Nothing outside the process can provision these queues.
                if !options.check_and_create_queues {
                    for queue in &options.queues {
                        provider.ensure_queue(&options.transport_queue_name(queue)?)?;
                    }
                }
                Arc::new(provider)
            }
            ProviderType::ServiceBus => {
                let config = ServiceBusConfig {
                    connection_string: options.connection_string.clone(),
                    token_ttl_seconds: options.token_ttl_seconds,
                    ..Default::default()
                };
                Arc::new(ServiceBusProvider::new(config)?)
            }
        };

        Self::with_provider(provider, options)
    }

    /// Build over an already constructed transport
    pub fn with_provider(
        provider: Arc<dyn QueueProvider>,
        options: JobQueueOptions,
    ) -> Result<Self, QueueError> {
        info!(
            provider = %provider.provider_type(),
            queues = ?options.queues,
            queue_prefix = %options.queue_prefix,
            check_and_create_queues = options.check_and_create_queues,
            "Configuring job queue"
        );

        let registry = Arc::new(QueueClientRegistry::new(provider, &options));
        let job_queue = Arc::new(ServiceBusJobQueue::new(Arc::clone(&registry), &options)?);
        let monitoring = Arc::new(MonitoringApi::new(Arc::clone(&registry)));

        Ok(Self {
            options,
            registry,
            job_queue,
            monitoring,
        })
    }

    /// Options the provider was built from
    pub fn options(&self) -> &JobQueueOptions {
        &self.options
    }

    /// Configured logical queue names
    pub fn queues(&self) -> &[String] {
        self.registry.queues()
    }

    pub fn registry(&self) -> Arc<QueueClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn job_queue(&self) -> Arc<ServiceBusJobQueue> {
        Arc::clone(&self.job_queue)
    }

    pub fn monitoring(&self) -> Arc<MonitoringApi> {
        Arc::clone(&self.monitoring)
    }
}
