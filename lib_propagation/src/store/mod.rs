//! # Entity Store
//!
//! Persists entity documents keyed by the `attributes.name` natural key.
//!
//! `DocumentStore` is the narrow backend seam (find / update / insert);
//! `EntityStore` layers the upsert and identity-resolution rules on top of it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::MetadataEntity;

/// In-process document store used by tests and the `--memory` server mode.
pub mod memory;
/// Postgres document store (JSONB attributes).
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryDocumentStore;
#[cfg(feature = "postgres")]
pub use postgres::PgDocumentStore;

/// A persisted entity together with the identifier the store assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub id: String,
    pub entity: MetadataEntity,
}

/// Backend contract for entity documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document whose `attributes.name` equals `name`.
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredEntity>>;

    /// Full replace of the document stored under `id`.
    async fn update(&self, id: &str, entity: &MetadataEntity) -> Result<()>;

    /// Inserts a new document and returns its freshly assigned id.
    async fn insert(&self, entity: &MetadataEntity) -> Result<String>;

    async fn get(&self, id: &str) -> Result<Option<StoredEntity>>;

    /// Number of documents carrying `name`. More than one means a lost race.
    async fn count_by_name(&self, name: &str) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}

/// Result of an upsert: the stable id and whether the document was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: String,
    pub is_new: bool,
}

/// # Entity Store Adapter
///
/// Resolves identity by name and either replaces the existing document or
/// inserts a new one. The lookup and the write are two separate backend calls,
/// so concurrent upserts of the same new name can both insert.
#[derive(Clone)]
pub struct EntityStore {
    documents: Arc<dyn DocumentStore>,
}

impl EntityStore {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Upserts `entity` and reports whether it was newly created.
    pub async fn upsert(&self, entity: &MetadataEntity) -> Result<UpsertOutcome> {
        let name = entity.name()?;

        match self.documents.find_by_name(name).await? {
            Some(existing) => {
                self.documents.update(&existing.id, entity).await?;
                tracing::debug!(metadata_id = %existing.id, name, "Replaced existing metadata document");
                Ok(UpsertOutcome {
                    id: existing.id,
                    is_new: false,
                })
            }
            None => {
                let id = self.documents.insert(entity).await?;
                tracing::debug!(metadata_id = %id, name, "Inserted new metadata document");
                Ok(UpsertOutcome { id, is_new: true })
            }
        }
    }

    /// The underlying backend, for health probes and readers.
    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: serde_json::Value) -> MetadataEntity {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn upsert_reuses_id_and_replaces_document() {
        let backend = Arc::new(MemoryDocumentStore::new());
        let store = EntityStore::new(backend.clone());

        let first = store
            .upsert(&entity(json!({"entity_type": "dataset", "attributes": {"name": "orders", "rows": 10}, "tenant_id": "t1"})))
            .await
            .unwrap();
        assert!(first.is_new);

        let replacement = entity(json!({"entity_type": "table", "attributes": {"name": "orders", "owner": "alice"}, "tenant_id": "t2"}));
        let second = store.upsert(&replacement).await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.id, first.id);

        let stored = backend.get(&first.id).await.unwrap().unwrap();
        // Full replace: the `rows` attribute from the first call is gone.
        assert_eq!(stored.entity, replacement);
        assert_eq!(backend.count_by_name("orders").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_without_name_touches_nothing() {
        let backend = Arc::new(MemoryDocumentStore::new());
        let store = EntityStore::new(backend.clone());

        let err = store
            .upsert(&entity(json!({"entity_type": "dataset", "attributes": {}, "tenant_id": "t1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::PropagationError::InvalidEntity(_)));
        assert_eq!(backend.len().await, 0);
    }
}
