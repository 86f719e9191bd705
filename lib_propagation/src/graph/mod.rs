//! # Dependency Graph Index
//!
//! Records which downstream sinks an entity impacts and answers "who must be
//! told about a change to this entity".
//!
//! The backend is reached through `GraphStore`, a small repository interface
//! (`apply` a batch of merge-by-key mutations, list `edges_from` a node) so the
//! propagation logic never sees a query language.
//!
//! ## Encoding
//! - Entity node: key = entity id, label `Metadata`, properties `entity_type`,
//!   `attributes` (serialized JSON string) and `tenant_id`.
//! - Sink node: key = downstream id, label `QueueNode` with `topic` or
//!   `LiveChannelNode` with `address`.
//! - Edge: `Metadata -IMPACTS-> sink`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{DownstreamNode, MetadataEntity, Sink};

/// In-process graph used by tests and the `--memory` server mode.
pub mod memory;
/// Postgres node/edge tables.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryGraphStore;
#[cfg(feature = "postgres")]
pub use postgres::PgGraphStore;

pub const ENTITY_LABEL: &str = "Metadata";
pub const QUEUE_LABEL: &str = "QueueNode";
pub const LIVE_CHANNEL_LABEL: &str = "LiveChannelNode";
pub const IMPACTS: &str = "IMPACTS";

/// A labelled node with flat string properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: String,
    pub label: String,
    pub properties: BTreeMap<String, String>,
}

impl GraphNode {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

/// One idempotent write. Applying the same mutation twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphMutation {
    /// Create the node keyed by `key`, or overwrite its label and properties.
    UpsertNode(GraphNode),
    /// Create the edge if it does not exist. Both endpoints must be upserted first.
    UpsertEdge {
        from: String,
        relation: String,
        to: String,
    },
}

/// Backend contract for the dependency graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Applies the batch as a single read/write transaction.
    async fn apply(&self, batch: &[GraphMutation]) -> Result<()>;

    /// Targets of every `relation` edge leaving `key`. Unknown keys yield an empty list.
    async fn edges_from(&self, key: &str, relation: &str) -> Result<Vec<GraphNode>>;

    async fn node_count(&self) -> Result<usize>;

    async fn edge_count(&self) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}

/// # Dependency Graph
///
/// Builds the entity's edge set once, at creation, and reads it on every upsert.
#[derive(Clone)]
pub struct DependencyGraph {
    store: Arc<dyn GraphStore>,
}

impl DependencyGraph {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Links a newly created entity to every node of the downstream registry.
    ///
    /// Fan-out-to-all: each registered node becomes an impacted sink. Every
    /// write merges by key, so re-running this for the same entity changes nothing.
    pub async fn materialize(
        &self,
        entity_id: &str,
        entity: &MetadataEntity,
        downstream: &[DownstreamNode],
    ) -> Result<()> {
        let attributes = serde_json::to_string(&entity.attributes)?;
        let mut batch = Vec::with_capacity(1 + downstream.len() * 2);

        batch.push(GraphMutation::UpsertNode(
            GraphNode::new(entity_id, ENTITY_LABEL)
                .with_property("entity_type", entity.entity_type.as_str())
                .with_property("attributes", attributes)
                .with_property("tenant_id", entity.tenant_id.as_str()),
        ));

        for node in downstream {
            batch.push(GraphMutation::UpsertNode(sink_node(node)));
            batch.push(GraphMutation::UpsertEdge {
                from: entity_id.to_string(),
                relation: IMPACTS.to_string(),
                to: node.id.clone(),
            });
        }

        self.store.apply(&batch).await?;
        tracing::debug!(metadata_id = entity_id, sinks = downstream.len(), "Materialized dependency edges");
        Ok(())
    }

    /// Sinks currently reachable over `IMPACTS` edges from the entity.
    ///
    /// An entity with no edges (never materialized, or unknown id) has no sinks.
    pub async fn impacted_sinks(&self, entity_id: &str) -> Result<Vec<Sink>> {
        let targets = self.store.edges_from(entity_id, IMPACTS).await?;
        Ok(targets.iter().filter_map(node_to_sink).collect())
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }
}

fn sink_node(node: &DownstreamNode) -> GraphNode {
    match &node.sink {
        Sink::Queue { topic } => GraphNode::new(node.id.as_str(), QUEUE_LABEL).with_property("topic", topic.as_str()),
        Sink::LiveChannel { address } => {
            GraphNode::new(node.id.as_str(), LIVE_CHANNEL_LABEL).with_property("address", address.as_str())
        }
    }
}

fn node_to_sink(node: &GraphNode) -> Option<Sink> {
    let sink = match node.label.as_str() {
        QUEUE_LABEL => node.property("topic").map(|topic| Sink::Queue {
            topic: topic.to_string(),
        }),
        LIVE_CHANNEL_LABEL => node.property("address").map(|address| Sink::LiveChannel {
            address: address.to_string(),
        }),
        _ => None,
    };
    if sink.is_none() {
        tracing::debug!(key = %node.key, label = %node.label, "Skipping unrecognised downstream node");
    }
    sink
}
