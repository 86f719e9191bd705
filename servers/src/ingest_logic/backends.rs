use anyhow::{Context, Result};
use std::sync::Arc;

use lib_propagation::broker::{MemoryBroker, QueuePublisher, RedisStreamBroker};
use lib_propagation::cache::{MemoryStateCache, RedisStateCache, StateCache};
use lib_propagation::graph::{GraphStore, MemoryGraphStore, PgGraphStore};
use lib_propagation::store::postgres::connect_pool;
use lib_propagation::store::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use lib_propagation::{IngestPipeline, LiveChannelRegistry};

use crate::ingest_logic::config::Config;

/// Queue publishes retained by the in-memory broker.
const MEMORY_BROKER_HISTORY: usize = 1024;

/// Connects every collaborator named by `config` and wires the pipeline.
pub async fn build_pipeline(config: &Config, live: Arc<LiveChannelRegistry>) -> Result<IngestPipeline> {
    let (documents, graph, cache, broker): (
        Arc<dyn DocumentStore>,
        Arc<dyn GraphStore>,
        Arc<dyn StateCache>,
        Arc<dyn QueuePublisher>,
    ) = if config.memory {
        tracing::warn!(
            broker_history = MEMORY_BROKER_HISTORY,
            "Running on in-memory backends; nothing survives a restart and only the newest queue publishes are kept."
        );
        (
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryStateCache::new()),
            Arc::new(MemoryBroker::bounded(MEMORY_BROKER_HISTORY)),
        )
    } else {
        let database_url = config.database_url.as_deref().context("databaseUrl is not set")?;
        let redis_url = config.redis_url.as_deref().context("redisUrl is not set")?;

        let pool = connect_pool(database_url)?;
        let documents = PgDocumentStore::new(pool.clone());
        documents.ensure_schema().await.context("Failed to prepare document store schema")?;
        let graph = PgGraphStore::new(pool);
        graph.ensure_schema().await.context("Failed to prepare graph store schema")?;
        tracing::info!("PostgreSQL document and graph stores ready.");

        let cache = RedisStateCache::connect(redis_url).await.context("Failed to connect the Redis cache")?;
        let broker = RedisStreamBroker::connect(redis_url, config.stream_prefix.clone())
            .await
            .context("Failed to connect the Redis stream broker")?;
        tracing::info!("Redis cache and stream broker ready.");

        (Arc::new(documents), Arc::new(graph), Arc::new(cache), Arc::new(broker))
    };

    tracing::info!(
        sinks = config.downstream.len(),
        notify_address = %config.notify_address,
        "Downstream registry loaded"
    );

    Ok(IngestPipeline::new(
        documents,
        graph,
        cache,
        broker,
        live,
        config.downstream.clone(),
    ))
}
