//! Tests for the queue client against the in-memory backend.

use super::*;
use crate::backend::QueueBackend;
use crate::backends::InMemoryBackend;
use crate::error::QueueError;
use crate::message::{Message, MessageId, PopReceipt, QueueName};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;

/// Backend that fails every call; used to prove that argument validation
/// short-circuits before any backend contact.
struct RejectingBackend;

#[async_trait]
impl QueueBackend for RejectingBackend {
    async fn ensure_queue(&self, _queue: &QueueName) -> Result<(), QueueError> {
        Err(QueueError::ConnectionFailed {
            message: "backend contacted".to_string(),
        })
    }

    async fn put_message(
        &self,
        _queue: &QueueName,
        _payload: &str,
    ) -> Result<MessageId, QueueError> {
        Err(QueueError::ConnectionFailed {
            message: "backend contacted".to_string(),
        })
    }

    async fn get_messages(
        &self,
        _queue: &QueueName,
        _count: u32,
        _visibility: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        Err(QueueError::ConnectionFailed {
            message: "backend contacted".to_string(),
        })
    }

    async fn peek_message(&self, _queue: &QueueName) -> Result<Option<Message>, QueueError> {
        Err(QueueError::ConnectionFailed {
            message: "backend contacted".to_string(),
        })
    }

    async fn delete_message(
        &self,
        _queue: &QueueName,
        _id: &MessageId,
        _receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        Err(QueueError::ConnectionFailed {
            message: "backend contacted".to_string(),
        })
    }
}

fn memory_client() -> QueueClient {
    QueueClient::with_backend(Arc::new(InMemoryBackend::new()), "samplequeue").unwrap()
}

fn rejecting_client() -> QueueClient {
    QueueClient::with_backend(Arc::new(RejectingBackend), "samplequeue").unwrap()
}

// ============================================================================
// Construction
// ============================================================================

mod construction {
    use super::*;

    const VALID_CONNECTION: &str = "AccountName=testaccount;AccountKey=c2VjcmV0a2V5";

    #[test]
    fn test_empty_connection_string_rejected() {
        let result = QueueClient::from_connection_string("", "samplequeue");
        assert!(result.unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_whitespace_connection_string_rejected() {
        let result = QueueClient::from_connection_string("   ", "samplequeue");
        assert!(result.unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_empty_queue_name_rejected() {
        let result = QueueClient::from_connection_string(VALID_CONNECTION, "");
        assert!(result.unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_whitespace_queue_name_rejected() {
        let result = QueueClient::from_connection_string(VALID_CONNECTION, "  \t ");
        assert!(result.unwrap_err().is_invalid_argument());
    }

    /// Construction normalizes the queue name; test fixtures can rely on the
    /// lowercase form
    #[test]
    fn test_queue_name_normalized_to_lowercase() {
        let client = QueueClient::from_connection_string(VALID_CONNECTION, "SampleQueue").unwrap();
        assert_eq!(client.queue_name().as_str(), "samplequeue");
    }

    /// The debug rendering names the bound queue without requiring the
    /// backend to be printable
    #[test]
    fn test_debug_rendering_names_the_queue() {
        let client = rejecting_client();
        let rendered = format!("{:?}", client);
        assert!(rendered.contains("samplequeue"));
    }

    /// Construction is lazy: a client over a failing backend builds fine and
    /// only errors on first use
    #[tokio::test]
    async fn test_construction_performs_no_io() {
        let client = rejecting_client();
        let result = client.get_message().await;
        assert!(matches!(
            result.unwrap_err(),
            QueueError::ConnectionFailed { .. }
        ));
    }
}

// ============================================================================
// Validation Before I/O
// ============================================================================

mod validation {
    use super::*;

    #[tokio::test]
    async fn test_empty_payload_rejected_without_backend_contact() {
        let client = rejecting_client();
        let error = client.add_message("").await.unwrap_err();
        assert!(error.is_invalid_argument(), "got: {:?}", error);
    }

    #[tokio::test]
    async fn test_whitespace_payload_rejected_without_backend_contact() {
        let client = rejecting_client();
        let error = client.add_message(" \t\n ").await.unwrap_err();
        assert!(error.is_invalid_argument(), "got: {:?}", error);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_without_backend_contact() {
        let client = rejecting_client();
        let payload = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        let error = client.add_message(&payload).await.unwrap_err();
        assert!(matches!(
            error,
            QueueError::Validation(crate::error::ValidationError::MessageTooLarge { .. })
        ));
    }

    /// A payload of exactly the maximum size passes validation and reaches
    /// the backend
    #[tokio::test]
    async fn test_max_size_payload_reaches_backend() {
        let client = rejecting_client();
        let payload = "x".repeat(MAX_PAYLOAD_BYTES);
        let error = client.add_message(&payload).await.unwrap_err();
        assert!(matches!(error, QueueError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_batch_count_zero_rejected_without_backend_contact() {
        let client = rejecting_client();
        let error = client
            .get_messages(0, Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(error.is_invalid_argument(), "got: {:?}", error);
    }

    #[tokio::test]
    async fn test_batch_count_above_ceiling_rejected_without_backend_contact() {
        let client = rejecting_client();
        let error = client
            .get_messages(MAX_BATCH_SIZE + 1, Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(error.is_invalid_argument(), "got: {:?}", error);
    }

    /// A zero or negative window would leave retrieved messages immediately
    /// claimable again, so it never reaches the backend
    #[tokio::test]
    async fn test_non_positive_visibility_rejected_without_backend_contact() {
        let client = rejecting_client();

        let zero = client
            .get_messages(1, Duration::zero())
            .await
            .unwrap_err();
        assert!(zero.is_invalid_argument(), "got: {:?}", zero);

        let negative = client
            .get_messages(1, Duration::seconds(-5))
            .await
            .unwrap_err();
        assert!(negative.is_invalid_argument(), "got: {:?}", negative);
    }

    #[tokio::test]
    async fn test_batch_count_bounds_accepted() {
        let client = memory_client();
        assert!(client.get_messages(1, Duration::minutes(1)).await.is_ok());
        assert!(client
            .get_messages(MAX_BATCH_SIZE, Duration::minutes(1))
            .await
            .is_ok());
    }
}

// ============================================================================
// Round Trips
// ============================================================================

mod round_trip {
    use super::*;

    /// Add, get, delete; the message does not reappear while the visibility
    /// window is still open
    #[tokio::test]
    async fn test_add_get_delete_round_trip() {
        let client = memory_client();

        client.add_message("x").await.unwrap();

        let message = client.get_message().await.unwrap().expect("one message");
        assert_eq!(message.payload, "x");
        assert_eq!(message.dequeue_count, 1);
        assert!(message.is_deletable());

        client.delete_message(&message).await.unwrap();

        let after_delete = client.get_message().await.unwrap();
        assert!(after_delete.is_none());
    }

    /// A retrieved-but-undeleted message is invisible until its window
    /// elapses
    #[tokio::test]
    async fn test_retrieved_message_invisible_before_window_elapses() {
        let client = memory_client();
        client.add_message("only").await.unwrap();

        let first = client.get_message().await.unwrap();
        assert!(first.is_some());

        // Default window is 30s; an immediate second get sees nothing
        let second = client.get_message().await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_empty_queue_contract() {
        let client = memory_client();

        assert!(client.get_message().await.unwrap().is_none());
        assert!(client.peek_message().await.unwrap().is_none());
        assert!(client
            .get_messages(5, Duration::minutes(1))
            .await
            .unwrap()
            .is_empty());
    }
}

// ============================================================================
// Batch Retrieval
// ============================================================================

mod batch {
    use super::*;

    /// Two batch calls over the same backend never observe the same message:
    /// the first call's visibility window hides its results from the second
    #[tokio::test]
    async fn test_batches_are_disjoint() {
        let backend = Arc::new(InMemoryBackend::new());
        let client_a = QueueClient::with_backend(backend.clone(), "samplequeue").unwrap();
        let client_b = QueueClient::with_backend(backend, "samplequeue").unwrap();

        for i in 0..10 {
            client_a.add_message(&format!("message-{}", i)).await.unwrap();
        }

        let batch_a = client_a.get_messages(5, Duration::hours(1)).await.unwrap();
        let batch_b = client_b.get_messages(5, Duration::hours(1)).await.unwrap();

        assert_eq!(batch_a.len(), 5);
        assert_eq!(batch_b.len(), 5);

        let ids: HashSet<&str> = batch_a
            .iter()
            .chain(batch_b.iter())
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids.len(), 10, "no message may appear in both batches");
    }

    /// Fewer visible messages than requested is a valid outcome, not an error
    #[tokio::test]
    async fn test_partial_batch_is_not_an_error() {
        let client = memory_client();
        client.add_message("a").await.unwrap();
        client.add_message("b").await.unwrap();

        let batch = client.get_messages(32, Duration::minutes(1)).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    /// Every message in a batch carries its own receipt and deletes
    /// independently
    #[tokio::test]
    async fn test_batch_messages_delete_independently() {
        let client = memory_client();
        for i in 0..3 {
            client.add_message(&format!("m{}", i)).await.unwrap();
        }

        let batch = client.get_messages(3, Duration::hours(1)).await.unwrap();
        for message in &batch {
            client.delete_message(message).await.unwrap();
        }

        assert!(client.peek_message().await.unwrap().is_none());
    }
}

// ============================================================================
// Peek
// ============================================================================

mod peek {
    use super::*;

    /// Repeated peeks return the same payload and never advance the dequeue
    /// count
    #[tokio::test]
    async fn test_peek_is_idempotent() {
        let client = memory_client();
        client.add_message("front").await.unwrap();

        let first = client.peek_message().await.unwrap().expect("a message");
        let second = client.peek_message().await.unwrap().expect("a message");

        assert_eq!(first.payload, "front");
        assert_eq!(second.payload, "front");
        assert_eq!(first.dequeue_count, 0);
        assert_eq!(second.dequeue_count, 0);
    }

    /// Peek results carry no pop receipt, so they cannot be deleted
    #[tokio::test]
    async fn test_peeked_message_cannot_be_deleted() {
        let client = memory_client();
        client.add_message("front").await.unwrap();

        let peeked = client.peek_message().await.unwrap().expect("a message");
        assert!(peeked.pop_receipt.is_none());
        assert!(peeked.next_visible_at.is_none());

        let error = client.delete_message(&peeked).await.unwrap_err();
        assert!(error.is_invalid_argument());
    }

    /// Peek does not hide the message from a subsequent get
    #[tokio::test]
    async fn test_peek_does_not_claim_the_message() {
        let client = memory_client();
        client.add_message("front").await.unwrap();

        client.peek_message().await.unwrap();
        let retrieved = client.get_message().await.unwrap();
        assert!(retrieved.is_some());
    }
}

// ============================================================================
// Delete Semantics
// ============================================================================

mod delete {
    use super::*;

    #[tokio::test]
    async fn test_delete_twice_fails_with_not_found() {
        let client = memory_client();
        client.add_message("once").await.unwrap();

        let message = client.get_message().await.unwrap().expect("a message");
        client.delete_message(&message).await.unwrap();

        let error = client.delete_message(&message).await.unwrap_err();
        assert!(matches!(error, QueueError::MessageNotFound { .. }));
    }

    /// A receipt goes stale once the message expires back to visible and is
    /// retrieved again; only the most recent receipt deletes
    #[tokio::test]
    async fn test_stale_receipt_fails_with_not_found() {
        let client = memory_client();
        client.add_message("contested").await.unwrap();

        let first = client
            .get_messages(1, Duration::milliseconds(20))
            .await
            .unwrap()
            .pop()
            .expect("a message");

        // Let the visibility window lapse, then claim it again
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        let second = client
            .get_messages(1, Duration::hours(1))
            .await
            .unwrap()
            .pop()
            .expect("message became visible again");

        assert_eq!(first.id, second.id);
        assert_ne!(first.pop_receipt, second.pop_receipt);

        let stale = client.delete_message(&first).await.unwrap_err();
        assert!(matches!(stale, QueueError::MessageNotFound { .. }));

        // The current receipt still works
        client.delete_message(&second).await.unwrap();
    }
}
