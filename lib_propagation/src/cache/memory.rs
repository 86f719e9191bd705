use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::StateCache;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryStateCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StateCache for MemoryStateCache {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites() {
        let cache = MemoryStateCache::new();
        cache.put("id", "v1").await.unwrap();
        cache.put("id", "v2").await.unwrap();
        assert_eq!(cache.get("id").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("other").await.unwrap(), None);
    }
}
