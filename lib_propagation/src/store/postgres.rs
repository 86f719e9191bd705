//! # PostgreSQL Document Store
//!
//! Entity documents live in one table with the attribute map kept as JSONB.
//! The name column is indexed, not unique. Identity is resolved by the
//! adapter with a lookup followed by a write.

use async_trait::async_trait;
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::{Map, Value};
use tokio_postgres::types::Json;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use super::{DocumentStore, StoredEntity};
use crate::error::{PropagationError, Result};
use crate::model::MetadataEntity;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata_entities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    attributes  JSONB NOT NULL,
    tenant_id   TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS metadata_entities_name_idx ON metadata_entities (name);
"#;

/// Builds a `deadpool_postgres` pool for `database_url`.
///
/// The graph store shares this helper so both can run off one pool.
pub fn connect_pool(database_url: &str) -> Result<Pool> {
    let mut pg_pool_config = DeadpoolConfig::new();
    pg_pool_config.url = Some(database_url.to_string());
    pg_pool_config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    pg_pool_config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| PropagationError::DocumentStore(format!("Failed to create database pool: {}", e)))
}

fn store_err(e: impl std::fmt::Display) -> PropagationError {
    PropagationError::DocumentStore(e.to_string())
}

/// Postgres-backed `DocumentStore`.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: Pool,
}

impl PgDocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the table and index when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(store_err)?;
        client.batch_execute(SCHEMA).await.map_err(store_err)?;
        Ok(())
    }

    fn row_to_entity(row: &Row) -> Result<StoredEntity> {
        let attributes: Json<Map<String, Value>> = row.try_get("attributes").map_err(store_err)?;
        Ok(StoredEntity {
            id: row.try_get("id").map_err(store_err)?,
            entity: MetadataEntity {
                entity_type: row.try_get("entity_type").map_err(store_err)?,
                attributes: attributes.0,
                tenant_id: row.try_get("tenant_id").map_err(store_err)?,
            },
        })
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredEntity>> {
        let client = self.pool.get().await.map_err(store_err)?;
        let row = client
            .query_opt(
                "SELECT id, entity_type, attributes, tenant_id FROM metadata_entities \
                 WHERE name = $1 ORDER BY created_at LIMIT 1",
                &[&name],
            )
            .await
            .map_err(store_err)?;
        row.as_ref().map(Self::row_to_entity).transpose()
    }

    async fn update(&self, id: &str, entity: &MetadataEntity) -> Result<()> {
        let name = entity.name()?;
        let client = self.pool.get().await.map_err(store_err)?;
        client
            .execute(
                "UPDATE metadata_entities \
                 SET name = $2, entity_type = $3, attributes = $4, tenant_id = $5 \
                 WHERE id = $1",
                &[&id, &name, &entity.entity_type, &Json(&entity.attributes), &entity.tenant_id],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn insert(&self, entity: &MetadataEntity) -> Result<String> {
        let name = entity.name()?;
        let id = Uuid::new_v4().to_string();
        let client = self.pool.get().await.map_err(store_err)?;
        client
            .execute(
                "INSERT INTO metadata_entities (id, name, entity_type, attributes, tenant_id) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[&id, &name, &entity.entity_type, &Json(&entity.attributes), &entity.tenant_id],
            )
            .await
            .map_err(store_err)?;
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<StoredEntity>> {
        let client = self.pool.get().await.map_err(store_err)?;
        let row = client
            .query_opt(
                "SELECT id, entity_type, attributes, tenant_id FROM metadata_entities WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(store_err)?;
        row.as_ref().map(Self::row_to_entity).transpose()
    }

    async fn count_by_name(&self, name: &str) -> Result<usize> {
        let client = self.pool.get().await.map_err(store_err)?;
        let row = client
            .query_one("SELECT COUNT(*) FROM metadata_entities WHERE name = $1", &[&name])
            .await
            .map_err(store_err)?;
        let count: i64 = row.try_get(0).map_err(store_err)?;
        Ok(count as usize)
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(store_err)?;
        client.simple_query("SELECT 1").await.map_err(store_err)?;
        Ok(())
    }
}
