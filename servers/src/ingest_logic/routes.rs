use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use lib_propagation::{IngestPipeline, IngestReceipt, MetadataEntity, PropagationError};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: IngestPipeline,
}

/// Any pipeline failure becomes a 500 carrying the error text.
pub struct ApiError(PropagationError);

impl From<PropagationError> for ApiError {
    fn from(e: PropagationError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub message: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ingest-metadata", post(ingest_handler))
        .route("/ws/notifications", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/check-postgres", get(check_postgres))
        .route("/check-graph", get(check_graph))
        .route("/check-redis", get(check_redis))
        .route("/check-broker", get(check_broker))
        .layer(cors)
        .with_state(state)
}

async fn ingest_handler(
    State(state): State<AppState>,
    Json(entity): Json<MetadataEntity>,
) -> Result<Json<IngestReceipt>, ApiError> {
    let receipt = state.pipeline.ingest(&entity).await?;
    Ok(Json(receipt))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn probe<F>(backend: &str, check: F) -> Json<HealthStatus>
where
    F: Future<Output = lib_propagation::Result<()>>,
{
    match check.await {
        Ok(()) => Json(HealthStatus {
            status: "success",
            message: format!("Connected to {}", backend),
        }),
        Err(e) => {
            tracing::warn!(backend, error = %e, "Health probe failed");
            Json(HealthStatus {
                status: "failure",
                message: e.to_string(),
            })
        }
    }
}

async fn check_postgres(State(state): State<AppState>) -> Json<HealthStatus> {
    probe("document store", state.pipeline.store().documents().ping()).await
}

async fn check_graph(State(state): State<AppState>) -> Json<HealthStatus> {
    probe("graph store", state.pipeline.graph().store().ping()).await
}

async fn check_redis(State(state): State<AppState>) -> Json<HealthStatus> {
    probe("cache", state.pipeline.cache().ping()).await
}

async fn check_broker(State(state): State<AppState>) -> Json<HealthStatus> {
    let broker = Arc::clone(state.pipeline.dispatcher().broker());
    probe("broker", async move { broker.list_topics().await.map(|_| ()) }).await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let live = Arc::clone(state.pipeline.dispatcher().live());
    let (connection_id, mut frames) = live.register();

    loop {
        tokio::select! {
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        tracing::info!(connection_id, "Received live channel message: {}", text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection_id, error = %e, "Live channel read failed");
                        break;
                    }
                }
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // Pruned from the registry.
                    break;
                };
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break; // client disconnected
                }
            }
        }
    }

    live.unregister(connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use lib_propagation::broker::MemoryBroker;
    use lib_propagation::cache::MemoryStateCache;
    use lib_propagation::graph::MemoryGraphStore;
    use lib_propagation::store::MemoryDocumentStore;
    use lib_propagation::{DownstreamNode, LiveChannelRegistry};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    const OWN: &str = "ws://localhost:8000/ws/notifications";

    fn app() -> (Router, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::new());
        let pipeline = IngestPipeline::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryStateCache::new()),
            broker.clone(),
            Arc::new(LiveChannelRegistry::new(OWN)),
            vec![
                DownstreamNode::queue("kafka_node", "downstream_topic"),
                DownstreamNode::live_channel("websocket_node", OWN),
            ],
        );
        (router(AppState { pipeline }), broker)
    }

    async fn post_json(app: &Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest-metadata")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn ingest_returns_stable_metadata_id() {
        let (app, broker) = app();

        let (status, first) = post_json(
            &app,
            json!({"entity_type": "dataset", "attributes": {"name": "orders"}, "tenant_id": "t1"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["status"], "success");

        let (_, second) = post_json(
            &app,
            json!({"entity_type": "dataset", "attributes": {"name": "orders", "owner": "alice"}, "tenant_id": "t1"}),
        )
        .await;
        assert_eq!(second["metadata_id"], first["metadata_id"]);
        assert_eq!(broker.published_to("downstream_topic").await.len(), 2);
    }

    #[tokio::test]
    async fn pipeline_failure_maps_to_server_error() {
        let (app, _) = app();
        let (status, body) = post_json(
            &app,
            json!({"entity_type": "dataset", "attributes": {"owner": "alice"}, "tenant_id": "t1"}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Invalid metadata entity: missing required attribute 'name'");
    }

    #[tokio::test]
    async fn health_probes_report_success() {
        let (app, _) = app();
        for path in ["/check-postgres", "/check-graph", "/check-redis", "/check-broker"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["status"], "success", "{}", path);
        }
    }

    #[tokio::test]
    async fn notification_socket_receives_change_events() {
        let live = Arc::new(LiveChannelRegistry::new(OWN));
        let pipeline = IngestPipeline::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryStateCache::new()),
            Arc::new(MemoryBroker::new()),
            live.clone(),
            vec![DownstreamNode::live_channel("websocket_node", OWN)],
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState { pipeline: pipeline.clone() });
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/notifications", addr))
            .await
            .unwrap();
        wait_for_connections(&live, 1).await;

        let orders: MetadataEntity =
            serde_json::from_value(json!({"entity_type": "dataset", "attributes": {"name": "orders"}, "tenant_id": "t1"}))
                .unwrap();
        let receipt = pipeline.ingest(&orders).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let event: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(event["metadata_id"], receipt.metadata_id.as_str());
        assert_eq!(event["impact"], "update");
        assert_eq!(event["attributes"]["name"], "orders");

        client.close(None).await.unwrap();
        wait_for_connections(&live, 0).await;
    }

    async fn wait_for_connections(live: &LiveChannelRegistry, expected: usize) {
        for _ in 0..200 {
            if live.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} live connections, found {}", expected, live.len());
    }
}
