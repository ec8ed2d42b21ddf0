//! # Queue Client
//!
//! Client library for cloud message queues with visibility-timeout semantics:
//! a retrieved message becomes invisible to other consumers for a window and
//! must be deleted with the pop receipt captured at retrieval time, otherwise
//! it reappears and is delivered again (at-least-once delivery).
//!
//! This library provides:
//! - A single [`client::QueueClient`] offering add, single get, batch get,
//!   peek, and delete operations against one named queue
//! - A [`backend::QueueBackend`] capability trait so the client logic can be
//!   exercised against an in-memory fake in unit tests
//! - An Azure Storage Queue backend speaking the REST API directly with
//!   Shared Key request signing
//! - An in-memory backend implementing the same lease contract for tests and
//!   offline demos
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Message record, identifiers, and pop receipts
//! - [`backend`] - Backend capability trait
//! - [`client`] - The queue client
//! - [`backends`] - Azure Storage and in-memory backend implementations

// Module declarations
pub mod backend;
pub mod backends;
pub mod client;
pub mod error;
pub mod message;

// Re-export commonly used types at crate root for convenience
pub use backend::QueueBackend;
pub use backends::{AzureQueueBackend, AzureQueueConfig, InMemoryBackend};
pub use client::{
    default_visibility_timeout, QueueClient, DEFAULT_VISIBILITY_SECS, MAX_BATCH_SIZE,
    MAX_PAYLOAD_BYTES,
};
pub use error::{ConfigurationError, QueueError, ValidationError};
pub use message::{Message, MessageId, PopReceipt, QueueName, Timestamp};
