//! Tests for the monitoring surface.

use super::*;
use crate::client::{MessageReceiver, QueueAdministrator, QueueHandle, QueueProvider};
use crate::message::{Message, MessageId, PeekedMessage, QueueName};
use crate::options::JobQueueOptions;
use crate::provider::{ProviderType, QueueDescription, QueueRuntimeInfo};
use crate::providers::memory::InMemoryProvider;
use async_trait::async_trait;
use std::time::Duration;

async fn monitoring_with_jobs(ids: &[&str]) -> (MonitoringApi, Arc<QueueClientRegistry>) {
    let options = JobQueueOptions {
        provider: ProviderType::InMemory,
        queues: vec!["default".to_string(), "critical".to_string()],
        ..Default::default()
    };
    let registry = Arc::new(QueueClientRegistry::new(
        Arc::new(InMemoryProvider::default()),
        &options,
    ));
    let handle = registry.get_handle("default").await.unwrap();
    for id in ids {
        handle
            .send_message(&Message::for_job(&JobId::new(*id).unwrap()))
            .await
            .unwrap();
    }
    (MonitoringApi::new(Arc::clone(&registry)), registry)
}

fn ids(job_ids: &[JobId]) -> Vec<&str> {
    job_ids.iter().map(|id| id.as_str()).collect()
}

#[tokio::test]
async fn test_queues_in_configuration_order() {
    let (monitoring, _registry) = monitoring_with_jobs(&[]).await;

    assert_eq!(monitoring.queues(), vec!["default", "critical"]);
}

#[tokio::test]
async fn test_enqueued_job_ids_pages() {
    let (monitoring, _registry) = monitoring_with_jobs(&["1", "2", "3", "4", "5"]).await;

    let first = monitoring.enqueued_job_ids("default", 0, 2).await.unwrap();
    let second = monitoring.enqueued_job_ids("default", 2, 2).await.unwrap();
    let past_end = monitoring.enqueued_job_ids("default", 10, 2).await.unwrap();

    assert_eq!(ids(&first), vec!["1", "2"]);
    assert_eq!(ids(&second), vec!["3", "4"]);
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn test_enqueued_job_ids_skip_non_numeric() {
    let (monitoring, _registry) = monitoring_with_jobs(&["1", "not-a-job", "3"]).await;

    let page = monitoring.enqueued_job_ids("default", 0, 10).await.unwrap();

    assert_eq!(ids(&page), vec!["1", "3"]);
}

#[tokio::test]
async fn test_fetched_job_ids_always_empty() {
    let (monitoring, registry) = monitoring_with_jobs(&["1"]).await;
    let receiver = registry.get_handle("default").await.unwrap().create_receiver();
    let _leased = receiver
        .receive_message(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();

    let fetched = monitoring.fetched_job_ids("default", 0, 10).await.unwrap();

    assert!(fetched.is_empty());
}

#[tokio::test]
async fn test_counts_report_enqueued_only() {
    let (monitoring, _registry) = monitoring_with_jobs(&["1", "2"]).await;

    let counts = monitoring.enqueued_and_fetched_count("default").await.unwrap();

    assert_eq!(counts.enqueued_count, 2);
    assert_eq!(counts.fetched_count, None);
}

#[tokio::test]
async fn test_unknown_queue_rejected() {
    let (monitoring, _registry) = monitoring_with_jobs(&[]).await;

    let result = monitoring.enqueued_job_ids("other", 0, 10).await;

    assert!(matches!(
        result,
        Err(QueueError::QueueNotConfigured { .. })
    ));
}

// ============================================================================
// Transports without peek
// ============================================================================

struct BlindHandle {
    name: QueueName,
}

#[async_trait]
impl QueueHandle for BlindHandle {
    fn queue_name(&self) -> &QueueName {
        &self.name
    }

    async fn send_message(&self, message: &Message) -> Result<MessageId, QueueError> {
        Ok(message.message_id.clone())
    }

    fn create_receiver(&self) -> Arc<dyn MessageReceiver> {
        unimplemented!("monitoring never receives")
    }

    async fn peek_messages(&self, _max_messages: u32) -> Result<Vec<PeekedMessage>, QueueError> {
        Err(QueueError::Unsupported {
            provider: "ServiceBus".to_string(),
            operation: "peek".to_string(),
        })
    }
}

struct BlindProvider;

#[async_trait]
impl QueueProvider for BlindProvider {
    async fn open_queue(&self, queue: &QueueName) -> Result<Arc<dyn QueueHandle>, QueueError> {
        Ok(Arc::new(BlindHandle {
            name: queue.clone(),
        }))
    }

    fn administrator(&self) -> Arc<dyn QueueAdministrator> {
        Arc::new(BlindProvider)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::ServiceBus
    }
}

#[async_trait]
impl QueueAdministrator for BlindProvider {
    async fn queue_exists(&self, _queue: &QueueName) -> Result<bool, QueueError> {
        Ok(true)
    }

    async fn create_queue(&self, _description: &QueueDescription) -> Result<(), QueueError> {
        Ok(())
    }

    async fn runtime_info(&self, _queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError> {
        Ok(QueueRuntimeInfo {
            active_message_count: 7,
            dead_letter_message_count: 1,
        })
    }
}

#[tokio::test]
async fn test_unsupported_peek_yields_empty_page() {
    let options = JobQueueOptions::default();
    let registry = Arc::new(QueueClientRegistry::new(Arc::new(BlindProvider), &options));
    let monitoring = MonitoringApi::new(registry);

    let page = monitoring.enqueued_job_ids("default", 0, 10).await.unwrap();
    let counts = monitoring.enqueued_and_fetched_count("default").await.unwrap();

    assert!(page.is_empty());
    assert_eq!(counts.enqueued_count, 7);
}
