//! The queue client: argument validation and operation sequencing on top of
//! a [`QueueBackend`].

use crate::backend::QueueBackend;
use crate::backends::AzureQueueBackend;
use crate::error::{QueueError, ValidationError};
use crate::message::{Message, QueueName};
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Invisibility window in seconds applied by [`QueueClient::get_message`].
///
/// Batch retrieval takes an explicit window instead; there is no batch
/// default.
pub const DEFAULT_VISIBILITY_SECS: i64 = 30;

/// [`DEFAULT_VISIBILITY_SECS`] as a duration
pub fn default_visibility_timeout() -> Duration {
    Duration::seconds(DEFAULT_VISIBILITY_SECS)
}

/// Maximum payload size in bytes accepted by [`QueueClient::add_message`]
pub const MAX_PAYLOAD_BYTES: usize = 65_536;

/// Maximum number of messages per batch retrieval (service-imposed ceiling)
pub const MAX_BATCH_SIZE: u32 = 32;

/// Client bound to a single named queue.
///
/// The client is lazy: construction performs no network I/O and does not
/// verify the queue exists. Every operation ensures the queue exists
/// (create-if-absent) before acting, so first use on a fresh account works
/// without a separate provisioning step.
///
/// The client holds no mutable state beyond the immutable queue name and the
/// shared backend handle; it is safe for concurrent use from multiple tasks.
/// The backend's lease mechanism, not the client, arbitrates which consumer
/// observes a given message.
pub struct QueueClient {
    backend: Arc<dyn QueueBackend>,
    queue: QueueName,
}

// Manual impl: the backend trait object is not Debug
impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl QueueClient {
    /// Create a client for an Azure Storage queue from a connection string.
    ///
    /// The queue name is validated and normalized to lowercase (storage
    /// naming requirement). Fails with a validation error if the connection
    /// string is empty or whitespace, or if the queue name is empty,
    /// whitespace, or malformed. The connection string is parsed locally;
    /// no network call is made.
    pub fn from_connection_string(
        connection_string: &str,
        queue_name: &str,
    ) -> Result<Self, QueueError> {
        if connection_string.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "connection_string".to_string(),
            }
            .into());
        }

        let backend = AzureQueueBackend::from_connection_string(connection_string)?;
        Self::with_backend(Arc::new(backend), queue_name)
    }

    /// Create a client over any backend implementation.
    ///
    /// Used by tests (in-memory backend) and by callers that build their own
    /// transport.
    pub fn with_backend(
        backend: Arc<dyn QueueBackend>,
        queue_name: &str,
    ) -> Result<Self, QueueError> {
        let queue = QueueName::new(queue_name)?;
        Ok(Self { backend, queue })
    }

    /// Get the (normalized) queue name this client is bound to
    pub fn queue_name(&self) -> &QueueName {
        &self.queue
    }

    /// Append a message to the queue.
    ///
    /// Fails with a validation error, before any network call, if the payload
    /// is empty, whitespace-only, or larger than [`MAX_PAYLOAD_BYTES`].
    pub async fn add_message(&self, payload: &str) -> Result<(), QueueError> {
        if payload.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "payload".to_string(),
            }
            .into());
        }

        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(ValidationError::MessageTooLarge {
                size: payload.len(),
                max_size: MAX_PAYLOAD_BYTES,
            }
            .into());
        }

        self.backend.ensure_queue(&self.queue).await?;
        let id = self.backend.put_message(&self.queue, payload).await?;
        debug!(queue = %self.queue, message_id = %id, "Message added");

        Ok(())
    }

    /// Retrieve the next visible message, or `None` if the queue is empty.
    ///
    /// The returned message is invisible to other consumers for
    /// [`DEFAULT_VISIBILITY_SECS`] seconds and its dequeue count is
    /// incremented.
    pub async fn get_message(&self) -> Result<Option<Message>, QueueError> {
        self.backend.ensure_queue(&self.queue).await?;
        let mut messages = self
            .backend
            .get_messages(&self.queue, 1, default_visibility_timeout())
            .await?;

        Ok(messages.pop())
    }

    /// Retrieve up to `count` visible messages, each invisible for
    /// `visibility`.
    ///
    /// Unlike [`QueueClient::get_message`] the invisibility window must be
    /// supplied explicitly on every call. Fails with a validation error,
    /// before any network call, unless `1 <= count <= 32` and `visibility`
    /// is positive. An empty result means no messages were visible, not an
    /// error.
    pub async fn get_messages(
        &self,
        count: u32,
        visibility: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        if count < 1 || count > MAX_BATCH_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "count".to_string(),
                message: format!("must be 1-{}, got {}", MAX_BATCH_SIZE, count),
            }
            .into());
        }

        if visibility <= Duration::zero() {
            return Err(ValidationError::OutOfRange {
                field: "visibility".to_string(),
                message: format!(
                    "must be positive, got {}s",
                    visibility.num_seconds()
                ),
            }
            .into());
        }

        self.backend.ensure_queue(&self.queue).await?;
        self.backend
            .get_messages(&self.queue, count, visibility)
            .await
    }

    /// Read the next visible message without changing its visibility or
    /// dequeue count, or `None` if the queue is empty.
    ///
    /// The snapshot carries no pop receipt and cannot be deleted.
    pub async fn peek_message(&self) -> Result<Option<Message>, QueueError> {
        self.backend.ensure_queue(&self.queue).await?;
        self.backend.peek_message(&self.queue).await
    }

    /// Permanently remove a previously retrieved message.
    ///
    /// Fails with a validation error if the message carries no pop receipt
    /// (it came from a peek). Fails with
    /// [`QueueError::MessageNotFound`] if the `(id, pop_receipt)` pair no
    /// longer matches a live message: already deleted, or expired back to
    /// visible and re-retrieved by another consumer. Deleting twice surfaces
    /// `MessageNotFound`, never a panic.
    pub async fn delete_message(&self, message: &Message) -> Result<(), QueueError> {
        let receipt = message.pop_receipt.as_ref().ok_or_else(|| {
            ValidationError::Required {
                field: "pop_receipt".to_string(),
            }
        })?;

        self.backend.ensure_queue(&self.queue).await?;
        self.backend
            .delete_message(&self.queue, &message.id, receipt)
            .await?;
        debug!(queue = %self.queue, message_id = %message.id, "Message deleted");

        Ok(())
    }
}
