//! # Notification Dispatcher
//!
//! Delivers one change event to each impacted sink through the sink's own
//! mechanism:
//!
//! - `queue` sinks are published to their topic on the durable broker;
//! - `live-channel` sinks go through the `LiveChannelRegistry` broadcast.
//!
//! Sinks are independent of each other, so their order does not matter. A
//! broker error stops the fan-out and is returned unchanged; nothing is retried.

use std::sync::Arc;

use serde::Serialize;

use crate::broker::QueuePublisher;
use crate::core::registry::LiveChannelRegistry;
use crate::error::Result;
use crate::model::{ChangeEvent, Sink};

/// # Dispatch Report
///
/// One counter per delivery outcome. `queued + broadcast + skipped` always
/// equals the number of sinks handed to `dispatch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Queue sinks published to the broker.
    pub queued: usize,
    /// Live-channel sinks addressed to this process and broadcast locally.
    pub broadcast: usize,
    /// Live-channel sinks addressed to another process; nothing was sent.
    pub skipped: usize,
    /// Total connections that accepted a broadcast frame.
    pub connections_reached: usize,
}

impl DispatchReport {
    /// Delivery attempts made, one per sink.
    pub fn attempts(&self) -> usize {
        self.queued + self.broadcast + self.skipped
    }
}

/// Routes change events to sinks.
#[derive(Clone)]
pub struct NotificationDispatcher {
    broker: Arc<dyn QueuePublisher>,
    live: Arc<LiveChannelRegistry>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher publishing to `broker` and broadcasting through `live`.
    pub fn new(broker: Arc<dyn QueuePublisher>, live: Arc<LiveChannelRegistry>) -> Self {
        Self { broker, live }
    }

    /// The live registry this dispatcher broadcasts through.
    pub fn live(&self) -> &Arc<LiveChannelRegistry> {
        &self.live
    }

    /// The broker queue sinks are published to.
    pub fn broker(&self) -> &Arc<dyn QueuePublisher> {
        &self.broker
    }

    /// # Dispatch
    ///
    /// Makes exactly one delivery attempt per sink. The payload is serialized
    /// once and shared by every sink.
    pub async fn dispatch(&self, event: &ChangeEvent, sinks: &[Sink]) -> Result<DispatchReport> {
        let payload = serde_json::to_value(event)?;
        let mut report = DispatchReport::default();

        for sink in sinks {
            match sink {
                Sink::Queue { topic } => {
                    self.broker.send(topic, &payload).await?;
                    report.queued += 1;
                }
                Sink::LiveChannel { address } => {
                    let reached = self.live.broadcast(address, &payload);
                    if address == self.live.own_address() {
                        report.broadcast += 1;
                        report.connections_reached += reached;
                    } else {
                        report.skipped += 1;
                    }
                }
            }
        }

        tracing::debug!(
            metadata_id = %event.metadata_id,
            queued = report.queued,
            broadcast = report.broadcast,
            skipped = report.skipped,
            connections = report.connections_reached,
            "Change event dispatched"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::model::MetadataEntity;
    use serde_json::json;

    const OWN: &str = "ws://localhost:8000/ws/notifications";

    fn event() -> ChangeEvent {
        let entity: MetadataEntity =
            serde_json::from_value(json!({"entity_type": "dataset", "attributes": {"name": "orders"}, "tenant_id": "t1"}))
                .unwrap();
        ChangeEvent::update("id-1", &entity)
    }

    #[tokio::test]
    async fn routes_each_sink_by_type() {
        let broker = Arc::new(MemoryBroker::new());
        let live = Arc::new(LiveChannelRegistry::new(OWN));
        let (_conn, mut rx) = live.register();
        let dispatcher = NotificationDispatcher::new(broker.clone(), live.clone());

        let sinks = vec![
            Sink::Queue { topic: "downstream_topic".into() },
            Sink::Queue { topic: "audit".into() },
            Sink::LiveChannel { address: OWN.into() },
            Sink::LiveChannel { address: "ws://remote:9000/ws".into() },
        ];
        let report = dispatcher.dispatch(&event(), &sinks).await.unwrap();

        assert_eq!(report.attempts(), sinks.len());
        assert_eq!(report.queued, 2);
        assert_eq!(report.broadcast, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.connections_reached, 1);

        let expected = serde_json::to_value(event()).unwrap();
        assert_eq!(broker.published_to("downstream_topic").await, vec![expected.clone()]);
        assert_eq!(broker.published_to("audit").await, vec![expected.clone()]);

        let frame = rx.recv().await.unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&frame).unwrap(), expected);
        // The remote sink must not produce a second local frame.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_sinks_no_deliveries() {
        let broker = Arc::new(MemoryBroker::new());
        let dispatcher = NotificationDispatcher::new(broker.clone(), Arc::new(LiveChannelRegistry::new(OWN)));

        let report = dispatcher.dispatch(&event(), &[]).await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert!(broker.published().await.is_empty());
    }
}
