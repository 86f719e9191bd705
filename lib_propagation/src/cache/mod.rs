//! # State Cache
//!
//! Write-through cache of the latest serialized state per entity id.
//! Writes overwrite unconditionally; there is no TTL or eviction.

use async_trait::async_trait;

use crate::error::Result;

/// In-process cache for tests and the `--memory` server mode.
pub mod memory;
/// Redis cache operations.
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStateCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisStateCache;

#[async_trait]
pub trait StateCache: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Read path for consumers outside the ingestion flow.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn ping(&self) -> Result<()>;
}
