//! # Redis Cache Implementation
//!
//! Async key-value writes over a multiplexed `ConnectionManager`, which
//! reconnects on its own after the server drops.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::StateCache;
use crate::error::{PropagationError, Result};

fn cache_err(e: redis::RedisError) -> PropagationError {
    PropagationError::Cache(e.to_string())
}

/// A handler for Redis cache interactions.
#[derive(Clone)]
pub struct RedisStateCache {
    /// Cloned per call; clones share one multiplexed connection.
    conn: ConnectionManager,
}

impl RedisStateCache {
    /// Opens a managed connection from a URL such as `redis://127.0.0.1/`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(cache_err)?;
        let conn = ConnectionManager::new(client).await.map_err(cache_err)?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StateCache for RedisStateCache {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(cache_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(cache_err)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(cache_err)?;
        Ok(())
    }
}
