//! # Queue CLI
//!
//! Producer and consumer loops for the queue client, plus the configuration
//! loading shared by both binaries.
//!
//! The loops live here rather than in the binaries so they can be unit
//! tested against the in-memory backend. Each loop takes an explicit
//! shutdown channel instead of a process-global flag: the binaries flip the
//! channel from a CTRL+C handler and the loop exits cleanly, even
//! mid-sleep.

use chrono::{Duration, Utc};
use queue_client::{InMemoryBackend, Message, QueueClient, QueueError};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

fn default_queue_name() -> String {
    "samplequeue".to_string()
}

/// Settings shared by the producer and consumer binaries
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Storage connection string; required unless the in-memory backend is
    /// selected
    pub connection_string: Option<String>,

    /// Queue both binaries operate on
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
}

/// Load settings from `config/queue.toml` (optional) and `QUEUE__`-prefixed
/// environment variables, e.g. `QUEUE__CONNECTION_STRING` and
/// `QUEUE__QUEUE_NAME`. Environment variables override the file.
pub fn load_settings() -> anyhow::Result<Settings> {
    let config = config::Config::builder()
        .add_source(
            config::File::with_name("config/queue")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(config::Environment::with_prefix("QUEUE").separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}

/// Build the queue client the binaries run against.
///
/// `use_memory` swaps in a fresh in-memory backend for offline demo runs;
/// note that each process then sees its own private queue.
pub fn build_client(
    settings: &Settings,
    use_memory: bool,
    queue_override: Option<&str>,
) -> anyhow::Result<QueueClient> {
    let queue_name = queue_override.unwrap_or(&settings.queue_name);

    let client = if use_memory {
        QueueClient::with_backend(Arc::new(InMemoryBackend::new()), queue_name)?
    } else {
        let connection_string = settings.connection_string.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "no connection string configured; set QUEUE__CONNECTION_STRING or pass --memory"
            )
        })?;
        QueueClient::from_connection_string(connection_string, queue_name)?
    };

    Ok(client)
}

// ============================================================================
// Producer Loop
// ============================================================================

/// Counters reported by [`run_producer`] when it stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerStats {
    pub added: u64,
}

/// Enqueue a timestamped sample message at a fixed cadence until the
/// shutdown channel flips.
///
/// One message is in flight at a time; the loop waits for each add to
/// complete before sleeping. A backend failure stops the loop and surfaces
/// the error; an interrupted sleep exits cleanly.
pub async fn run_producer(
    client: &QueueClient,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ProducerStats, QueueError> {
    let mut added = 0u64;

    while !*shutdown.borrow() {
        let payload = format!("sample message at {}", Utc::now().format("%+"));
        client.add_message(&payload).await?;
        added += 1;
        info!(added, payload = %payload, "Added to queue");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown.changed() => {
                // A dropped sender counts as shutdown
                if result.is_err() {
                    break;
                }
            }
        }
    }

    Ok(ProducerStats { added })
}

// ============================================================================
// Consumer Loop
// ============================================================================

/// How the consumer retrieves messages on each poll
#[derive(Debug, Clone, Copy)]
pub enum RetrievalMode {
    /// One message per poll with the client's default visibility window
    Single,
    /// Up to `count` messages per poll, hidden for `visibility`
    Batch { count: u32, visibility: Duration },
}

/// Counters reported by [`run_consumer`] when it stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub empty_polls: u64,
}

/// Poll the queue at a fixed interval, render each retrieved payload, and
/// delete each message after processing, until the shutdown channel flips.
///
/// An empty poll is a normal outcome and just waits for the next interval;
/// a backend failure stops the loop and surfaces the error.
pub async fn run_consumer(
    client: &QueueClient,
    mode: RetrievalMode,
    poll_interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ConsumerStats, QueueError> {
    let mut stats = ConsumerStats {
        processed: 0,
        empty_polls: 0,
    };

    while !*shutdown.borrow() {
        let messages: Vec<Message> = match mode {
            RetrievalMode::Single => client.get_message().await?.into_iter().collect(),
            RetrievalMode::Batch { count, visibility } => {
                client.get_messages(count, visibility).await?
            }
        };

        if messages.is_empty() {
            stats.empty_polls += 1;
            debug!("Queue is empty, waiting");
        } else {
            for message in &messages {
                info!(
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    payload = %message.payload,
                    "Read from queue"
                );
                client.delete_message(message).await?;
                stats.processed += 1;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            result = shutdown.changed() => {
                if result.is_err() {
                    break;
                }
            }
        }
    }

    Ok(stats)
}
