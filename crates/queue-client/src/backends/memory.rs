//! In-memory queue backend for testing and offline demos.
//!
//! Implements the same lease contract as the cloud backend:
//! - Retrieval hides a message for the requested visibility window,
//!   increments its dequeue count, and rotates its pop receipt
//! - Delete requires the receipt from the most recent retrieval; a stale
//!   receipt fails with `MessageNotFound`
//! - Peek reads the next visible message without touching its state
//! - Messages expire after a fixed TTL if never deleted
//!
//! Thread-safe; a single instance can be shared across tasks via `Arc`.

use crate::backend::QueueBackend;
use crate::error::QueueError;
use crate::message::{Message, MessageId, PopReceipt, QueueName, Timestamp};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// How long an undeleted message survives before the backend drops it.
/// Mirrors the storage service's default message TTL.
const MESSAGE_TTL_DAYS: i64 = 7;

/// A message stored in the queue with lease metadata
#[derive(Clone)]
struct StoredMessage {
    id: MessageId,
    payload: String,
    inserted_at: Timestamp,
    expires_at: Timestamp,
    /// Message is visible once the current time passes this point
    available_at: Timestamp,
    dequeue_count: u32,
    /// Receipt from the most recent retrieval; rotates on every retrieval
    pop_receipt: Option<String>,
}

impl StoredMessage {
    fn new(payload: &str) -> Self {
        let now = Timestamp::now();
        let expires_at =
            Timestamp::from_datetime(now.as_datetime() + Duration::days(MESSAGE_TTL_DAYS));

        Self {
            id: MessageId::new(uuid::Uuid::new_v4().to_string()),
            payload: payload.to_string(),
            inserted_at: now,
            expires_at,
            available_at: now,
            dequeue_count: 0,
            pop_receipt: None,
        }
    }

    fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    fn is_visible(&self, now: Timestamp) -> bool {
        now >= self.available_at
    }

    /// Read-only snapshot for peek results: no receipt, no visibility window
    fn peek_snapshot(&self) -> Message {
        Message {
            payload: self.payload.clone(),
            id: self.id.clone(),
            pop_receipt: None,
            inserted_at: Some(self.inserted_at),
            expires_at: Some(self.expires_at),
            next_visible_at: None,
            dequeue_count: self.dequeue_count,
        }
    }
}

/// In-memory queue backend
pub struct InMemoryBackend {
    queues: Mutex<HashMap<QueueName, VecDeque<StoredMessage>>>,
}

impl InMemoryBackend {
    /// Create new empty backend
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().expect("queue storage lock poisoned");
        queues.entry(queue.clone()).or_default();
        Ok(())
    }

    async fn put_message(
        &self,
        queue: &QueueName,
        payload: &str,
    ) -> Result<MessageId, QueueError> {
        let mut queues = self.queues.lock().expect("queue storage lock poisoned");
        let stored = StoredMessage::new(payload);
        let id = stored.id.clone();
        queues.entry(queue.clone()).or_default().push_back(stored);

        Ok(id)
    }

    async fn get_messages(
        &self,
        queue: &QueueName,
        count: u32,
        visibility: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        let mut queues = self.queues.lock().expect("queue storage lock poisoned");
        let messages = queues.entry(queue.clone()).or_default();

        let now = Timestamp::now();
        messages.retain(|m| !m.is_expired(now));

        let next_visible_at = Timestamp::from_datetime(now.as_datetime() + visibility);
        let mut retrieved = Vec::new();

        for stored in messages.iter_mut() {
            if retrieved.len() as u32 >= count {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }

            // Claim the message: hide it, bump the count, rotate the receipt
            let receipt = uuid::Uuid::new_v4().to_string();
            stored.available_at = next_visible_at;
            stored.dequeue_count += 1;
            stored.pop_receipt = Some(receipt.clone());

            retrieved.push(Message {
                payload: stored.payload.clone(),
                id: stored.id.clone(),
                pop_receipt: Some(PopReceipt::new(receipt)),
                inserted_at: Some(stored.inserted_at),
                expires_at: Some(stored.expires_at),
                next_visible_at: Some(next_visible_at),
                dequeue_count: stored.dequeue_count,
            });
        }

        Ok(retrieved)
    }

    async fn peek_message(&self, queue: &QueueName) -> Result<Option<Message>, QueueError> {
        let mut queues = self.queues.lock().expect("queue storage lock poisoned");
        let messages = queues.entry(queue.clone()).or_default();

        let now = Timestamp::now();
        messages.retain(|m| !m.is_expired(now));

        Ok(messages
            .iter()
            .find(|m| m.is_visible(now))
            .map(StoredMessage::peek_snapshot))
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        id: &MessageId,
        receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().expect("queue storage lock poisoned");
        let messages = queues.entry(queue.clone()).or_default();

        let now = Timestamp::now();
        messages.retain(|m| !m.is_expired(now));

        // The receipt only matches if it came from the most recent retrieval;
        // re-retrieval after the visibility window rotates it.
        let position = messages
            .iter()
            .position(|m| m.id == *id && m.pop_receipt.as_deref() == Some(receipt.as_str()));

        match position {
            Some(index) => {
                messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::MessageNotFound {
                receipt: receipt.as_str().to_string(),
            }),
        }
    }
}
