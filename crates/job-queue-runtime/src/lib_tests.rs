//! Tests for the job-queue-runtime library module.

use super::*;
use std::time::Duration;

#[test]
fn test_queue_name_validation() {
    // Valid names
    assert!(QueueName::new("test-queue".to_string()).is_ok());
    assert!(QueueName::new("queue_123".to_string()).is_ok());
    assert!(QueueName::new("hangfire.default".to_string()).is_ok());

    // Invalid names
    assert!(QueueName::new("".to_string()).is_err());
    assert!(QueueName::new("-leading-hyphen".to_string()).is_err());
    assert!(QueueName::new("trailing-hyphen-".to_string()).is_err());
    assert!(QueueName::new("double--hyphen".to_string()).is_err());
    assert!(QueueName::new("special@chars".to_string()).is_err());
}

#[test]
fn test_job_id_payload() {
    let job_id = JobId::new("31337").unwrap();
    let message = Message::for_job(&job_id);

    assert_eq!(&message.body[..], b"31337");
    assert!(JobId::new("").is_err());
}

#[test]
fn test_message_id_generation() {
    let id1 = MessageId::new();
    let id2 = MessageId::new();
    assert_ne!(id1, id2);
    assert!(!id1.as_str().is_empty());
}

#[test]
fn test_receipt_handle_expiry() {
    let receipt = ReceiptHandle::new(
        LockToken::generate(),
        "message-ref".to_string(),
        Timestamp::now().add(Duration::from_secs(300)),
        ProviderType::InMemory,
    );

    assert!(!receipt.is_expired());
    assert!(receipt.time_until_expiry() > Duration::from_secs(240));
}

#[test]
fn test_provider_capabilities() {
    assert!(ProviderType::InMemory.supports_dead_letter());
    assert!(ProviderType::InMemory.supports_peek());
    assert!(!ProviderType::ServiceBus.supports_dead_letter());
    assert!(!ProviderType::ServiceBus.supports_peek());
}

#[test]
fn test_error_classification() {
    assert!(QueueError::Timeout {
        duration: Duration::from_secs(1),
    }
    .is_timeout());

    assert!(!QueueError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_timeout());

    assert!(!QueueError::QueueMissing {
        queue_name: "test".to_string(),
    }
    .is_timeout());
}

#[tokio::test]
async fn test_end_to_end_through_crate_root() {
    let options = JobQueueOptions {
        provider: ProviderType::InMemory,
        queues: vec!["default".to_string()],
        loop_receive_timeout_ms: 50,
        ..Default::default()
    };
    let provider = JobQueueProvider::from_options(options).unwrap();
    let queue: std::sync::Arc<dyn PersistentJobQueue> = provider.job_queue();

    queue
        .enqueue("default", &JobId::new("1").unwrap())
        .await
        .unwrap();
    let job = queue
        .dequeue(&["default".to_string()], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(job.job_id().as_str(), "1");
    job.remove_from_queue().await.unwrap();
}
