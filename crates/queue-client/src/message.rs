//! Message record, identifiers, and pop receipts.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name, normalized to lowercase.
///
/// Queue names are lowercased on construction because the storage service
/// requires all-lowercase names; callers and test fixtures should expect the
/// normalized form back from [`QueueName::as_str`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        if name.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        let name = name.to_ascii_lowercase();

        // Validate length (storage service limit)
        if name.len() < 3 || name.len() > 63 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 3-63 characters".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric and hyphens)
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric and hyphens allowed".to_string(),
            });
        }

        // Validate no consecutive hyphens or leading/trailing hyphens
        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Opaque message identifier assigned by the backend on enqueue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Create message ID from a backend-assigned value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque lease token assigned on retrieval.
///
/// The receipt rotates every time the message becomes visible again and is
/// re-retrieved; a delete presented with a stale receipt fails with
/// [`crate::error::QueueError::MessageNotFound`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopReceipt(String);

impl PopReceipt {
    /// Create pop receipt from a backend-assigned value
    pub fn new(receipt: impl Into<String>) -> Self {
        Self(receipt.into())
    }

    /// Get receipt as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PopReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message
// ============================================================================

/// The transfer record moving through the queue.
///
/// The payload is caller-supplied and immutable once enqueued; every other
/// field is assigned by the backend. A message obtained from a retrieval
/// carries the pop receipt required to delete it; a peeked snapshot carries
/// `None` and can never be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Caller-supplied content
    pub payload: String,
    /// Backend-assigned identifier
    pub id: MessageId,
    /// Lease token from the most recent retrieval; `None` for peeked snapshots
    pub pop_receipt: Option<PopReceipt>,
    /// When the message was enqueued
    pub inserted_at: Option<Timestamp>,
    /// When the backend will drop the message if never deleted
    pub expires_at: Option<Timestamp>,
    /// End of the current invisibility window; `None` for peeked snapshots
    pub next_visible_at: Option<Timestamp>,
    /// Number of times a consumer has retrieved this message
    pub dequeue_count: u32,
}

impl Message {
    /// Check whether this message can be deleted (was obtained from a
    /// retrieval rather than a peek)
    pub fn is_deletable(&self) -> bool {
        self.pop_receipt.is_some()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
