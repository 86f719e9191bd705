//! # PostgreSQL Graph Store
//!
//! Nodes and edges as two tables. Upserts rely on `ON CONFLICT` so repeated
//! materialization merges instead of duplicating.

use std::collections::BTreeMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::types::Json;

use super::{GraphMutation, GraphNode, GraphStore};
use crate::error::{PropagationError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    key        TEXT PRIMARY KEY,
    label      TEXT NOT NULL,
    properties JSONB NOT NULL DEFAULT '{}'::jsonb
);
CREATE TABLE IF NOT EXISTS graph_edges (
    from_key   TEXT NOT NULL REFERENCES graph_nodes (key),
    relation   TEXT NOT NULL,
    to_key     TEXT NOT NULL REFERENCES graph_nodes (key),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (from_key, relation, to_key)
);
"#;

fn graph_err(e: impl std::fmt::Display) -> PropagationError {
    PropagationError::GraphStore(e.to_string())
}

/// Postgres-backed `GraphStore`.
#[derive(Clone)]
pub struct PgGraphStore {
    pool: Pool,
}

impl PgGraphStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(graph_err)?;
        client.batch_execute(SCHEMA).await.map_err(graph_err)?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn apply(&self, batch: &[GraphMutation]) -> Result<()> {
        let mut client = self.pool.get().await.map_err(graph_err)?;
        let tx = client.transaction().await.map_err(graph_err)?;

        for mutation in batch {
            match mutation {
                GraphMutation::UpsertNode(node) => {
                    tx.execute(
                        "INSERT INTO graph_nodes (key, label, properties) VALUES ($1, $2, $3) \
                         ON CONFLICT (key) DO UPDATE SET label = EXCLUDED.label, properties = EXCLUDED.properties",
                        &[&node.key, &node.label, &Json(&node.properties)],
                    )
                    .await
                    .map_err(graph_err)?;
                }
                GraphMutation::UpsertEdge { from, relation, to } => {
                    tx.execute(
                        "INSERT INTO graph_edges (from_key, relation, to_key) VALUES ($1, $2, $3) \
                         ON CONFLICT DO NOTHING",
                        &[from, relation, to],
                    )
                    .await
                    .map_err(graph_err)?;
                }
            }
        }

        tx.commit().await.map_err(graph_err)
    }

    async fn edges_from(&self, key: &str, relation: &str) -> Result<Vec<GraphNode>> {
        let client = self.pool.get().await.map_err(graph_err)?;
        let rows = client
            .query(
                "SELECT n.key, n.label, n.properties FROM graph_edges e \
                 JOIN graph_nodes n ON n.key = e.to_key \
                 WHERE e.from_key = $1 AND e.relation = $2 \
                 ORDER BY e.created_at, n.key",
                &[&key, &relation],
            )
            .await
            .map_err(graph_err)?;

        rows.iter()
            .map(|row| {
                let properties: Json<BTreeMap<String, String>> = row.try_get("properties").map_err(graph_err)?;
                Ok(GraphNode {
                    key: row.try_get("key").map_err(graph_err)?,
                    label: row.try_get("label").map_err(graph_err)?,
                    properties: properties.0,
                })
            })
            .collect()
    }

    async fn node_count(&self) -> Result<usize> {
        let client = self.pool.get().await.map_err(graph_err)?;
        let row = client
            .query_one("SELECT COUNT(*) FROM graph_nodes", &[])
            .await
            .map_err(graph_err)?;
        let count: i64 = row.try_get(0).map_err(graph_err)?;
        Ok(count as usize)
    }

    async fn edge_count(&self) -> Result<usize> {
        let client = self.pool.get().await.map_err(graph_err)?;
        let row = client
            .query_one("SELECT COUNT(*) FROM graph_edges", &[])
            .await
            .map_err(graph_err)?;
        let count: i64 = row.try_get(0).map_err(graph_err)?;
        Ok(count as usize)
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(graph_err)?;
        client.simple_query("SELECT 1").await.map_err(graph_err)?;
        Ok(())
    }
}
