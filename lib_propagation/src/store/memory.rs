use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DocumentStore, StoredEntity};
use crate::error::Result;
use crate::model::MetadataEntity;

/// Documents kept in insertion order behind an async mutex.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<Vec<StoredEntity>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.lock().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredEntity>> {
        let documents = self.documents.lock().await;
        Ok(documents
            .iter()
            .find(|doc| doc.entity.name().map_or(false, |n| n == name))
            .cloned())
    }

    async fn update(&self, id: &str, entity: &MetadataEntity) -> Result<()> {
        let mut documents = self.documents.lock().await;
        // Updating an id that vanished is a silent no-op, like a zero-match update.
        if let Some(doc) = documents.iter_mut().find(|doc| doc.id == id) {
            doc.entity = entity.clone();
        }
        Ok(())
    }

    async fn insert(&self, entity: &MetadataEntity) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.documents.lock().await.push(StoredEntity {
            id: id.clone(),
            entity: entity.clone(),
        });
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<StoredEntity>> {
        let documents = self.documents.lock().await;
        Ok(documents.iter().find(|doc| doc.id == id).cloned())
    }

    async fn count_by_name(&self, name: &str) -> Result<usize> {
        let documents = self.documents.lock().await;
        Ok(documents
            .iter()
            .filter(|doc| doc.entity.name().map_or(false, |n| n == name))
            .count())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
