//! Tests for in-memory queue provider.

use super::*;
use crate::message::JobId;
use crate::transaction::suppress;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

async fn provider_with_queue(name: &str) -> (InMemoryProvider, Arc<dyn QueueHandle>) {
    let provider = InMemoryProvider::default();
    provider.ensure_queue(&queue(name)).unwrap();
    let handle = provider.open_queue(&queue(name)).await.unwrap();
    (provider, handle)
}

fn job_message(id: &str) -> Message {
    Message::for_job(&JobId::new(id).unwrap())
}

// ============================================================================
// Queue Management Tests
// ============================================================================

mod queue_management {
    use super::*;

    /// Verify that a queue only exists after it has been created.
    #[tokio::test]
    async fn test_queue_exists_after_create() {
        let provider = InMemoryProvider::default();
        let admin = provider.administrator();
        let name = queue("jobs-default");

        assert!(!admin.queue_exists(&name).await.unwrap());

        let description = QueueDescription::new(name.clone(), &Default::default());
        admin.create_queue(&description).await.unwrap();

        assert!(admin.queue_exists(&name).await.unwrap());
    }

    /// Verify that creating an existing queue keeps its messages.
    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (provider, handle) = provider_with_queue("jobs").await;
        handle.send_message(&job_message("1")).await.unwrap();

        provider.ensure_queue(&queue("jobs")).unwrap();

        let info = provider.runtime_info(&queue("jobs")).await.unwrap();
        assert_eq!(info.active_message_count, 1);
    }

    /// Verify that sending to a queue that was never created fails.
    #[tokio::test]
    async fn test_send_to_missing_queue_fails() {
        let provider = InMemoryProvider::default();
        let handle = provider.open_queue(&queue("missing")).await.unwrap();

        let result = handle.send_message(&job_message("1")).await;

        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    }

    /// Verify that receiving from a queue that was never created fails.
    #[tokio::test]
    async fn test_receive_from_missing_queue_fails() {
        let provider = InMemoryProvider::default();
        let handle = provider.open_queue(&queue("missing")).await.unwrap();

        let result = handle
            .create_receiver()
            .receive_message(Duration::from_millis(1))
            .await;

        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    }

    /// Verify that the queue rejects sends once full.
    #[tokio::test]
    async fn test_queue_full_rejects_send() {
        let provider = InMemoryProvider::new(InMemoryConfig {
            max_queue_size: 1,
            ..Default::default()
        });
        provider.ensure_queue(&queue("small")).unwrap();
        let handle = provider.open_queue(&queue("small")).await.unwrap();

        handle.send_message(&job_message("1")).await.unwrap();
        let result = handle.send_message(&job_message("2")).await;

        match result {
            Err(QueueError::ProviderError { code, .. }) => assert_eq!(code, "QueueFull"),
            other => panic!("expected QueueFull, got {:?}", other),
        }
    }
}

// ============================================================================
// Receive and Settlement Tests
// ============================================================================

mod receive_and_settle {
    use super::*;

    /// Verify FIFO delivery and that received messages carry a lock.
    #[tokio::test]
    async fn test_receive_in_fifo_order() {
        let (_provider, handle) = provider_with_queue("jobs").await;
        handle.send_message(&job_message("1")).await.unwrap();
        handle.send_message(&job_message("2")).await.unwrap();

        let receiver = handle.create_receiver();
        let first = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let second = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.job_id().unwrap().as_str(), "1");
        assert_eq!(second.job_id().unwrap().as_str(), "2");
        assert_eq!(first.delivery_count, 1);
        assert!(!first.receipt_handle.is_expired());
        assert_eq!(first.receipt_handle.provider_type(), ProviderType::InMemory);
    }

    /// Verify that an empty queue yields None after the timeout.
    #[tokio::test]
    async fn test_receive_empty_queue_returns_none() {
        let (_provider, handle) = provider_with_queue("jobs").await;

        let received = handle
            .create_receiver()
            .receive_message(Duration::from_millis(5))
            .await
            .unwrap();

        assert!(received.is_none());
    }

    /// Verify that a blocked receiver wakes when a message arrives.
    #[tokio::test]
    async fn test_receive_wakes_on_send() {
        let (_provider, handle) = provider_with_queue("jobs").await;
        let receiver = handle.create_receiver();

        let waiter =
            tokio::spawn(async move { receiver.receive_message(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.send_message(&job_message("late")).await.unwrap();

        let received = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(received.job_id().unwrap().as_str(), "late");
    }

    /// Verify that complete removes the message and a second complete fails.
    #[tokio::test]
    async fn test_complete_removes_message() {
        let (provider, handle) = provider_with_queue("jobs").await;
        handle.send_message(&job_message("1")).await.unwrap();

        let receiver = handle.create_receiver();
        let received = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        receiver
            .complete_message(&received.receipt_handle)
            .await
            .unwrap();

        let info = provider.runtime_info(&queue("jobs")).await.unwrap();
        assert_eq!(info.active_message_count, 0);

        let again = receiver.complete_message(&received.receipt_handle).await;
        assert!(matches!(again, Err(QueueError::MessageLockLost { .. })));
    }

    /// Verify that abandon returns the message with an increased delivery count.
    #[tokio::test]
    async fn test_abandon_makes_message_available_again() {
        let (_provider, handle) = provider_with_queue("jobs").await;
        handle.send_message(&job_message("1")).await.unwrap();

        let receiver = handle.create_receiver();
        let received = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        receiver
            .abandon_message(&received.receipt_handle)
            .await
            .unwrap();

        let redelivered = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(redelivered.message_id, received.message_id);
        assert_eq!(redelivered.delivery_count, 2);
    }

    /// Verify that dead-lettering moves the message to the dead-letter sub-queue.
    #[tokio::test]
    async fn test_dead_letter_moves_message() {
        let (provider, handle) = provider_with_queue("jobs").await;
        handle.send_message(&job_message("1")).await.unwrap();

        let receiver = handle.create_receiver();
        let received = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        receiver
            .dead_letter_message(&received.receipt_handle, "poison")
            .await
            .unwrap();

        let info = provider.runtime_info(&queue("jobs")).await.unwrap();
        assert_eq!(info.active_message_count, 0);
        assert_eq!(info.dead_letter_message_count, 1);

        let dead = provider.dead_lettered(&queue("jobs")).unwrap();
        assert_eq!(dead[0].0, received.message_id);
        assert_eq!(dead[0].1, "poison");
    }

    /// Verify that exceeding the delivery limit dead-letters the message.
    #[tokio::test]
    async fn test_max_delivery_count_dead_letters() {
        let provider = InMemoryProvider::new(InMemoryConfig {
            default_max_delivery_count: 1,
            ..Default::default()
        });
        provider.ensure_queue(&queue("jobs")).unwrap();
        let handle = provider.open_queue(&queue("jobs")).await.unwrap();
        handle.send_message(&job_message("1")).await.unwrap();

        let receiver = handle.create_receiver();
        let received = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        receiver
            .abandon_message(&received.receipt_handle)
            .await
            .unwrap();

        let second = receiver
            .receive_message(Duration::from_millis(5))
            .await
            .unwrap();
        assert!(second.is_none());

        let dead = provider.dead_lettered(&queue("jobs")).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].1, "MaxDeliveryCountExceeded");
    }
}

// ============================================================================
// Lock Tests
// ============================================================================

mod locks {
    use super::*;

    async fn short_lock_queue() -> (InMemoryProvider, Arc<dyn QueueHandle>) {
        let provider = InMemoryProvider::default();
        let mut options = crate::provider::QueueDescriptionOptions::default();
        options.lock_duration_seconds = 1;
        provider
            .create_queue(&QueueDescription::new(queue("jobs"), &options))
            .await
            .unwrap();
        let handle = provider.open_queue(&queue("jobs")).await.unwrap();
        (provider, handle)
    }

    /// Verify that renewal extends the lock expiry.
    #[tokio::test]
    async fn test_renew_extends_lock() {
        let (_provider, handle) = provider_with_queue("jobs").await;
        handle.send_message(&job_message("1")).await.unwrap();

        let receiver = handle.create_receiver();
        let received = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let renewed = receiver
            .renew_message_lock(&received.receipt_handle)
            .await
            .unwrap();

        assert!(renewed > received.receipt_handle.locked_until());
    }

    /// Verify that an expired lock returns the message to the queue.
    #[tokio::test]
    async fn test_expired_lock_is_reclaimed() {
        let (_provider, handle) = short_lock_queue().await;
        handle.send_message(&job_message("1")).await.unwrap();

        let receiver = handle.create_receiver();
        let received = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let renew = receiver.renew_message_lock(&received.receipt_handle).await;
        assert!(matches!(renew, Err(QueueError::MessageLockLost { .. })));

        let redelivered = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.message_id, received.message_id);
        assert_eq!(redelivered.delivery_count, 2);
    }

    /// Verify that completing with an expired lock fails.
    #[tokio::test]
    async fn test_complete_after_expiry_fails() {
        let (_provider, handle) = short_lock_queue().await;
        handle.send_message(&job_message("1")).await.unwrap();

        let receiver = handle.create_receiver();
        let received = receiver
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let result = receiver.complete_message(&received.receipt_handle).await;
        assert!(matches!(result, Err(QueueError::MessageLockLost { .. })));
    }
}

// ============================================================================
// Peek and Transaction Tests
// ============================================================================

mod peek_and_transactions {
    use super::*;

    /// Verify that peek returns messages without locking them.
    #[tokio::test]
    async fn test_peek_does_not_lock() {
        let (_provider, handle) = provider_with_queue("jobs").await;
        for id in ["1", "2", "3"] {
            handle.send_message(&job_message(id)).await.unwrap();
        }

        let peeked = handle.peek_messages(2).await.unwrap();
        assert_eq!(peeked.len(), 2);
        assert_eq!(peeked[0].job_id().unwrap().as_str(), "1");

        let received = handle
            .create_receiver()
            .receive_message(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(received.is_some());
    }

    /// Verify that a send inside a transaction is held until commit.
    #[tokio::test]
    async fn test_send_enlists_in_ambient_transaction() {
        let (provider, handle) = provider_with_queue("jobs").await;
        let transaction = AmbientTransaction::begin();

        transaction
            .scope(handle.send_message(&job_message("1")))
            .await
            .unwrap();

        let info = provider.runtime_info(&queue("jobs")).await.unwrap();
        assert_eq!(info.active_message_count, 0);

        transaction.commit();

        let info = provider.runtime_info(&queue("jobs")).await.unwrap();
        assert_eq!(info.active_message_count, 1);
    }

    /// Verify that rollback discards an enlisted send.
    #[tokio::test]
    async fn test_rollback_discards_enlisted_send() {
        let (provider, handle) = provider_with_queue("jobs").await;
        let transaction = AmbientTransaction::begin();

        transaction
            .scope(handle.send_message(&job_message("1")))
            .await
            .unwrap();
        transaction.rollback();

        let info = provider.runtime_info(&queue("jobs")).await.unwrap();
        assert_eq!(info.active_message_count, 0);
    }

    /// Verify that a suppressed send is visible regardless of the transaction.
    #[tokio::test]
    async fn test_suppressed_send_ignores_transaction() {
        let (provider, handle) = provider_with_queue("jobs").await;
        let transaction = AmbientTransaction::begin();

        transaction
            .scope(suppress(handle.send_message(&job_message("1"))))
            .await
            .unwrap();
        transaction.rollback();

        let info = provider.runtime_info(&queue("jobs")).await.unwrap();
        assert_eq!(info.active_message_count, 1);
    }
}
