//! # Ingestion Orchestrator
//!
//! One ingestion request is one sequential unit of work:
//!
//! ```text
//! Received -> Upserted -> Materialized | SkipMaterialize -> Cached -> Queried -> Dispatched -> Done
//! ```
//!
//! Any failing step ends the request in `Failed`. The four backends commit
//! independently and nothing is rolled back: a store write followed by a graph
//! failure leaves a persisted entity with no edges, which will never propagate.
//!
//! Dispatch is awaited before the receipt is returned, so a successful
//! response means every sink has had its delivery attempt.
//!
//! No lock spans the upsert. Two concurrent ingestions of the same new name can
//! both miss the lookup and both insert.

use std::fmt;
use std::sync::Arc;

use crate::broker::QueuePublisher;
use crate::cache::StateCache;
use crate::core::dispatcher::{DispatchReport, NotificationDispatcher};
use crate::core::registry::LiveChannelRegistry;
use crate::error::Result;
use crate::graph::{DependencyGraph, GraphStore};
use crate::model::{ChangeEvent, DownstreamNode, IngestReceipt, MetadataEntity};
use crate::store::{DocumentStore, EntityStore};

/// Steps of the ingestion state machine, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    /// Request accepted, nothing written yet.
    Received,
    /// Document stored; id and novelty known.
    Upserted,
    /// Graph edges created for a new entity.
    Materialized,
    /// Existing entity; edges already exist.
    SkipMaterialize,
    /// Latest state written to the cache.
    Cached,
    /// Impacted sinks read from the graph.
    Queried,
    /// Every sink had its delivery attempt.
    Dispatched,
    /// Receipt returned.
    Done,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Received => "received",
            IngestStage::Upserted => "upserted",
            IngestStage::Materialized => "materialized",
            IngestStage::SkipMaterialize => "skip_materialize",
            IngestStage::Cached => "cached",
            IngestStage::Queried => "queried",
            IngestStage::Dispatched => "dispatched",
            IngestStage::Done => "done",
        };
        f.write_str(name)
    }
}

fn advance(stage: &mut IngestStage, next: IngestStage) {
    tracing::trace!(from = %stage, to = %next, "Ingest stage transition");
    *stage = next;
}

/// # Ingest Pipeline
///
/// Cheap to clone; every collaborator is shared behind an `Arc`.
#[derive(Clone)]
pub struct IngestPipeline {
    store: EntityStore,
    graph: DependencyGraph,
    cache: Arc<dyn StateCache>,
    dispatcher: NotificationDispatcher,
    downstream: Arc<[DownstreamNode]>,
}

impl IngestPipeline {
    /// Wires the pipeline from its collaborators and the fixed downstream registry.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        graph: Arc<dyn GraphStore>,
        cache: Arc<dyn StateCache>,
        broker: Arc<dyn QueuePublisher>,
        live: Arc<LiveChannelRegistry>,
        downstream: Vec<DownstreamNode>,
    ) -> Self {
        Self {
            store: EntityStore::new(documents),
            graph: DependencyGraph::new(graph),
            cache,
            dispatcher: NotificationDispatcher::new(broker, live),
            downstream: downstream.into(),
        }
    }

    /// # Ingest
    ///
    /// Runs the full workflow for one entity and returns
    /// `{status: "success", metadata_id}`. Collaborator errors are returned
    /// unchanged; the stage at which they happened is logged.
    pub async fn ingest(&self, entity: &MetadataEntity) -> Result<IngestReceipt> {
        let mut stage = IngestStage::Received;
        match self.run(entity, &mut stage).await {
            Ok((receipt, report)) => {
                tracing::info!(
                    metadata_id = %receipt.metadata_id,
                    deliveries = report.attempts(),
                    "Metadata ingested"
                );
                Ok(receipt)
            }
            Err(e) => {
                tracing::error!(stage = %stage, error = %e, "Metadata ingestion failed");
                Err(e)
            }
        }
    }

    async fn run(&self, entity: &MetadataEntity, stage: &mut IngestStage) -> Result<(IngestReceipt, DispatchReport)> {
        entity.validate()?;

        let upsert = self.store.upsert(entity).await?;
        advance(stage, IngestStage::Upserted);
        tracing::debug!(metadata_id = %upsert.id, is_new = upsert.is_new, "Entity upserted");

        if upsert.is_new {
            self.graph.materialize(&upsert.id, entity, &self.downstream).await?;
            advance(stage, IngestStage::Materialized);
        } else {
            advance(stage, IngestStage::SkipMaterialize);
        }

        let state = serde_json::to_string(entity)?;
        self.cache.put(&upsert.id, &state).await?;
        advance(stage, IngestStage::Cached);

        let sinks = self.graph.impacted_sinks(&upsert.id).await?;
        advance(stage, IngestStage::Queried);
        tracing::debug!(metadata_id = %upsert.id, sinks = sinks.len(), "Impacted sinks resolved");

        let event = ChangeEvent::update(&upsert.id, entity);
        let report = self.dispatcher.dispatch(&event, &sinks).await?;
        advance(stage, IngestStage::Dispatched);

        advance(stage, IngestStage::Done);
        Ok((IngestReceipt::success(upsert.id), report))
    }

    /// The entity store adapter.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// The dependency graph index.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The state cache.
    pub fn cache(&self) -> &Arc<dyn StateCache> {
        &self.cache
    }

    /// The notification dispatcher.
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// The fixed downstream registry new entities are linked to.
    pub fn downstream(&self) -> &[DownstreamNode] {
        &self.downstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::cache::MemoryStateCache;
    use crate::error::PropagationError;
    use crate::graph::MemoryGraphStore;
    use crate::store::MemoryDocumentStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    const OWN: &str = "ws://localhost:8000/ws/notifications";

    struct RefusingBroker;

    #[async_trait]
    impl QueuePublisher for RefusingBroker {
        async fn send(&self, _topic: &str, _payload: &Value) -> Result<()> {
            Err(PropagationError::Broker("refused".to_string()))
        }

        async fn list_topics(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn pipeline(broker: Arc<dyn QueuePublisher>) -> IngestPipeline {
        IngestPipeline::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryStateCache::new()),
            broker,
            Arc::new(LiveChannelRegistry::new(OWN)),
            vec![
                DownstreamNode::queue("kafka_node", "downstream_topic"),
                DownstreamNode::live_channel("websocket_node", OWN),
            ],
        )
    }

    fn entity(value: Value) -> MetadataEntity {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn stages_follow_the_ingest_path() {
        let pipeline = pipeline(Arc::new(MemoryBroker::new()));
        let orders = entity(json!({"entity_type": "dataset", "attributes": {"name": "orders"}, "tenant_id": "t1"}));

        let mut stage = IngestStage::Received;
        let (_, report) = pipeline.run(&orders, &mut stage).await.unwrap();
        assert_eq!(stage, IngestStage::Done);
        assert_eq!(report.attempts(), 2);

        let mut stage = IngestStage::Received;
        pipeline.run(&orders, &mut stage).await.unwrap();
        assert_eq!(stage, IngestStage::Done);
    }

    #[tokio::test]
    async fn failed_step_keeps_last_completed_stage() {
        let refusing = pipeline(Arc::new(RefusingBroker));
        let orders = entity(json!({"entity_type": "dataset", "attributes": {"name": "orders"}, "tenant_id": "t1"}));
        let mut stage = IngestStage::Received;
        assert!(refusing.run(&orders, &mut stage).await.is_err());
        assert_eq!(stage, IngestStage::Queried);

        let unnamed = entity(json!({"entity_type": "dataset", "attributes": {}, "tenant_id": "t1"}));
        let mut stage = IngestStage::Received;
        assert!(refusing.run(&unnamed, &mut stage).await.is_err());
        assert_eq!(stage, IngestStage::Received);
    }

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(IngestStage::SkipMaterialize.to_string(), "skip_materialize");
        assert_eq!(IngestStage::Dispatched.to_string(), "dispatched");
    }
}
