//! # Redis Streams Broker
//!
//! Each topic is a stream key (`<prefix><topic>`). A change event is one
//! stream entry with a single `payload` field holding the JSON text, so
//! consumer groups on the downstream side get durable, replayable delivery.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use serde_json::Value;

use super::QueuePublisher;
use crate::error::{PropagationError, Result};

/// Stream entry field carrying the serialized event.
pub const PAYLOAD_FIELD: &str = "payload";

fn broker_err(e: redis::RedisError) -> PropagationError {
    PropagationError::Broker(e.to_string())
}

#[derive(Clone)]
pub struct RedisStreamBroker {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStreamBroker {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = Client::open(url).map_err(broker_err)?;
        let conn = ConnectionManager::new(client).await.map_err(broker_err)?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    pub fn from_manager(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn stream_key(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }
}

#[async_trait]
impl QueuePublisher for RedisStreamBroker {
    async fn send(&self, topic: &str, payload: &Value) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        let mut conn = self.conn.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(self.stream_key(topic))
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(broker_err)?;
        tracing::trace!(topic, entry_id = %entry_id, "Published change event");
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.prefix);
        let mut cursor: u64 = 0;
        let mut topics = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("TYPE")
                .arg("stream")
                .query_async(&mut conn)
                .await
                .map_err(broker_err)?;

            topics.extend(
                keys.into_iter()
                    .map(|key| key.strip_prefix(self.prefix.as_str()).unwrap_or(&key).to_string()),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        topics.sort();
        topics.dedup();
        Ok(topics)
    }
}
