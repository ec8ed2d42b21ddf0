//! Backend capability trait for queue transports.

use crate::error::QueueError;
use crate::message::{Message, MessageId, PopReceipt, QueueName};
use async_trait::async_trait;
use chrono::Duration;

/// Interface implemented by queue transports (Azure Storage, in-memory).
///
/// The backend owns all lease discipline: visibility windows, pop receipt
/// rotation, and dequeue counting. The client layer on top only validates
/// arguments and sequences calls; it keeps no state the backend could
/// disagree with.
///
/// All operations are single network round trips. Cancelling one by dropping
/// the future leaves no client-side state to corrupt, but the server-side
/// outcome of a cancelled call is unknown, not rolled back.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Ensure the queue exists (create-if-absent, idempotent)
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Append a message; the backend assigns its ID
    async fn put_message(
        &self,
        queue: &QueueName,
        payload: &str,
    ) -> Result<MessageId, QueueError>;

    /// Retrieve up to `count` visible messages, making each invisible for
    /// `visibility` and incrementing its dequeue count.
    ///
    /// Fewer than `count` results (including none) means fewer were visible,
    /// not an error.
    async fn get_messages(
        &self,
        queue: &QueueName,
        count: u32,
        visibility: Duration,
    ) -> Result<Vec<Message>, QueueError>;

    /// Read the next visible message without changing its visibility or
    /// dequeue count. The returned snapshot carries no pop receipt.
    async fn peek_message(&self, queue: &QueueName) -> Result<Option<Message>, QueueError>;

    /// Permanently remove a message using the receipt from its most recent
    /// retrieval. A stale receipt fails with
    /// [`QueueError::MessageNotFound`].
    async fn delete_message(
        &self,
        queue: &QueueName,
        id: &MessageId,
        receipt: &PopReceipt,
    ) -> Result<(), QueueError>;
}
