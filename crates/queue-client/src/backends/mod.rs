//! Backend implementations.

pub mod azure;
pub mod memory;

pub use azure::{AzureQueueBackend, AzureQueueConfig};
pub use memory::InMemoryBackend;
