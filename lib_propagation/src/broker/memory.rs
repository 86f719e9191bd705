use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::QueuePublisher;
use crate::error::Result;

/// Publish recorder. Unbounded by default; `bounded` keeps only the newest entries.
#[derive(Default)]
pub struct MemoryBroker {
    published: Mutex<VecDeque<(String, Value)>>,
    limit: Option<usize>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` publishes, dropping the oldest first.
    pub fn bounded(limit: usize) -> Self {
        Self {
            published: Mutex::new(VecDeque::new()),
            limit: Some(limit),
        }
    }

    /// Everything retained so far, in publish order.
    pub async fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().await.iter().cloned().collect()
    }

    pub async fn published_to(&self, topic: &str) -> Vec<Value> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl QueuePublisher for MemoryBroker {
    async fn send(&self, topic: &str, payload: &Value) -> Result<()> {
        let mut published = self.published.lock().await;
        published.push_back((topic.to_string(), payload.clone()));
        if let Some(limit) = self.limit {
            while published.len() > limit {
                published.pop_front();
            }
        }
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let mut topics: Vec<String> = self.published.lock().await.iter().map(|(t, _)| t.clone()).collect();
        topics.sort();
        topics.dedup();
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn bounded_broker_drops_oldest_publishes() {
        let broker = MemoryBroker::bounded(2);
        for n in 0..5 {
            broker.send("events", &json!({"n": n})).await.unwrap();
        }

        assert_eq!(broker.published_to("events").await, vec![json!({"n": 3}), json!({"n": 4})]);
        assert_eq!(broker.list_topics().await.unwrap(), vec!["events".to_string()]);
    }

    #[tokio::test]
    async fn default_broker_keeps_everything() {
        let broker = MemoryBroker::new();
        for n in 0..5 {
            broker.send("events", &json!({"n": n})).await.unwrap();
        }
        assert_eq!(broker.published().await.len(), 5);
    }
}
