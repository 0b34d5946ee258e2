//! Tests for the job queue wiring.

use super::*;
use crate::error::ConfigurationError;
use crate::lease::LeaseState;

fn in_memory_options(queues: &[&str]) -> JobQueueOptions {
    JobQueueOptions {
        provider: ProviderType::InMemory,
        queues: queues.iter().map(|q| q.to_string()).collect(),
        loop_receive_timeout_ms: 50,
        poll_delay_ms: 1,
        ..Default::default()
    }
}

fn job(id: &str) -> JobId {
    JobId::new(id).unwrap()
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_service_bus_requires_connection_string() {
    let result = JobQueueProvider::from_options(JobQueueOptions::default());

    assert!(matches!(
        result,
        Err(QueueError::ConfigurationError(ConfigurationError::Missing { .. }))
    ));
}

#[test]
fn test_service_bus_builds_without_network() {
    let options = JobQueueOptions {
        connection_string: "Endpoint=sb://example.servicebus.windows.net/;\
                            SharedAccessKeyName=RootManageSharedAccessKey;\
                            SharedAccessKey=c2VjcmV0"
            .to_string(),
        queues: vec!["default".to_string(), "critical".to_string()],
        ..Default::default()
    };

    let provider = JobQueueProvider::from_options(options).unwrap();

    assert_eq!(provider.queues().to_vec(), vec!["default", "critical"]);
    assert_eq!(
        provider.registry().provider().provider_type(),
        ProviderType::ServiceBus
    );
}

#[test]
fn test_malformed_connection_string_rejected() {
    let options = JobQueueOptions {
        connection_string: "not a connection string".to_string(),
        ..Default::default()
    };

    assert!(JobQueueProvider::from_options(options).is_err());
}

#[test]
fn test_invalid_queue_list_rejected() {
    let options = JobQueueOptions {
        provider: ProviderType::InMemory,
        queues: vec!["default".to_string(), "default".to_string()],
        ..Default::default()
    };

    assert!(matches!(
        JobQueueProvider::from_options(options),
        Err(QueueError::ConfigurationError(ConfigurationError::Invalid { .. }))
    ));
}

// ============================================================================
// Job Lifecycle
// ============================================================================

#[tokio::test]
async fn test_enqueue_then_dequeue_then_remove() {
    let provider = JobQueueProvider::from_options(in_memory_options(&["default"])).unwrap();
    let queue = provider.job_queue();
    let cancel = CancellationToken::new();

    queue.enqueue("default", &job("100")).await.unwrap();
    let fetched = queue
        .dequeue(&["default".to_string()], &cancel)
        .await
        .unwrap();

    assert_eq!(fetched.job_id().as_str(), "100");
    fetched.remove_from_queue().await.unwrap();
    assert_eq!(fetched.state(), LeaseState::Completed);

    let counts = provider
        .monitoring()
        .enqueued_and_fetched_count("default")
        .await
        .unwrap();
    assert_eq!(counts.enqueued_count, 0);
}

#[tokio::test]
async fn test_requeued_job_is_fetched_again() {
    let provider = JobQueueProvider::from_options(in_memory_options(&["default"])).unwrap();
    let queue = provider.job_queue();
    let cancel = CancellationToken::new();
    let queues = vec!["default".to_string()];

    queue.enqueue("default", &job("7")).await.unwrap();
    let first = queue.dequeue(&queues, &cancel).await.unwrap();
    first.requeue().await.unwrap();

    let second = queue.dequeue(&queues, &cancel).await.unwrap();

    assert_eq!(second.job_id().as_str(), "7");
    assert_eq!(second.delivery_count(), 2);
    second.remove_from_queue().await.unwrap();
}

#[tokio::test]
async fn test_dequeue_honours_queue_order() {
    let provider =
        JobQueueProvider::from_options(in_memory_options(&["critical", "default"])).unwrap();
    let queue: Arc<dyn PersistentJobQueue> = provider.job_queue();
    let cancel = CancellationToken::new();
    let queues = vec!["critical".to_string(), "default".to_string()];

    queue.enqueue("default", &job("1")).await.unwrap();
    queue.enqueue("critical", &job("2")).await.unwrap();

    let first = queue.dequeue(&queues, &cancel).await.unwrap();
    let second = queue.dequeue(&queues, &cancel).await.unwrap();

    assert_eq!(first.job_id().as_str(), "2");
    assert_eq!(first.queue(), "critical");
    assert_eq!(second.job_id().as_str(), "1");
    first.remove_from_queue().await.unwrap();
    second.remove_from_queue().await.unwrap();
}

#[tokio::test]
async fn test_prefixed_queues_without_administration() {
    let options = JobQueueOptions {
        queue_prefix: "app-".to_string(),
        check_and_create_queues: false,
        ..in_memory_options(&["default"])
    };
    let provider = JobQueueProvider::from_options(options).unwrap();
    let queue = provider.job_queue();

    queue.enqueue("default", &job("3")).await.unwrap();
    let handle = provider.registry().get_handle("default").await.unwrap();

    assert_eq!(handle.queue_name().as_str(), "app-default");
    let fetched = queue
        .dequeue(&["default".to_string()], &CancellationToken::new())
        .await
        .unwrap();
    fetched.remove_from_queue().await.unwrap();
}
