//! # Data Model
//!
//! Wire and domain types shared by the pipeline, the backends and the HTTP layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PropagationError, Result};

/// Attribute key that acts as the natural identity of an entity.
pub const NAME_ATTRIBUTE: &str = "name";

/// # Metadata Entity
///
/// A metadata record as submitted by a caller. `attributes.name` is the
/// identity key: at most one stored document exists per distinct name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntity {
    /// Domain classification, e.g. `dataset`.
    pub entity_type: String,
    /// Free-form JSON attributes. Must contain a string `name`.
    pub attributes: Map<String, Value>,
    /// Carried opaquely; never used for access control.
    pub tenant_id: String,
}

impl MetadataEntity {
    /// Returns the identity key, or `InvalidEntity` when it is absent or not a string.
    pub fn name(&self) -> Result<&str> {
        match self.attributes.get(NAME_ATTRIBUTE) {
            Some(Value::String(name)) => Ok(name),
            Some(other) => Err(PropagationError::InvalidEntity(format!(
                "attribute 'name' must be a string, got {}",
                other
            ))),
            None => Err(PropagationError::InvalidEntity(
                "missing required attribute 'name'".to_string(),
            )),
        }
    }

    /// Minimal schema check: `entity_type` and `attributes.name` are required.
    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(PropagationError::InvalidEntity(
                "entity_type must not be empty".to_string(),
            ));
        }
        self.name().map(|_| ())
    }
}

/// # Sink
///
/// How a downstream consumer is reached. Serialized with a `type` tag of
/// `queue` or `live-channel`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Sink {
    /// Durable broker topic.
    Queue { topic: String },
    /// Live push endpoint, matched against this process's advertised address.
    LiveChannel { address: String },
}

impl Sink {
    /// The short type name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Sink::Queue { .. } => "queue",
            Sink::LiveChannel { .. } => "live-channel",
        }
    }
}

/// A member of the fixed downstream registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamNode {
    pub id: String,
    #[serde(flatten)]
    pub sink: Sink,
}

impl DownstreamNode {
    pub fn queue(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sink: Sink::Queue { topic: topic.into() },
        }
    }

    pub fn live_channel(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sink: Sink::LiveChannel { address: address.into() },
        }
    }
}

/// # Change Event
///
/// The payload delivered to every impacted sink, identical for every sink type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub metadata_id: String,
    pub impact: String,
    #[serde(flatten)]
    pub entity: MetadataEntity,
}

impl ChangeEvent {
    pub fn update(metadata_id: &str, entity: &MetadataEntity) -> Self {
        Self {
            metadata_id: metadata_id.to_string(),
            impact: "update".to_string(),
            entity: entity.clone(),
        }
    }
}

/// Successful ingestion response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub status: String,
    pub metadata_id: String,
}

impl IngestReceipt {
    pub fn success(metadata_id: String) -> Self {
        Self {
            status: "success".to_string(),
            metadata_id,
        }
    }
}
