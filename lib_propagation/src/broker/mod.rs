//! # Durable Queue Broker
//!
//! Write-only producer side of the queue. Consumption is done by the real
//! downstream services and never happens in this process.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Records every publish; used by tests and the `--memory` server mode.
pub mod memory;
/// Redis Streams producer.
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use memory::MemoryBroker;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamBroker;

#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Appends `payload` to `topic`. Returns once the broker has accepted it.
    async fn send(&self, topic: &str, payload: &Value) -> Result<()>;

    /// Topics known to the broker. Only health probes call this.
    async fn list_topics(&self) -> Result<Vec<String>>;
}
