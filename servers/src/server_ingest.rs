//! # Metadata Ingestion Server
//!
//! HTTP + WebSocket front for the change-propagation engine.
//!
//! - `POST /ingest-metadata` runs one ingestion through the pipeline.
//! - `GET /ws/notifications` is the live channel change events are pushed to.
//! - `GET /check-*` probe each backing system.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

mod ingest_logic;
use ingest_logic::{backends, config, logger, routes};
use lib_propagation::LiveChannelRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    let _log_guard = logger::setup_logging(&config.log_dir, &config.log_level)?;

    let live = Arc::new(LiveChannelRegistry::new(config.notify_address.clone()));
    let pipeline = backends::build_pipeline(&config, live).await?;
    let app = routes::router(routes::AppState { pipeline });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Ingestion server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => tracing::info!("SIGTERM received, initiating shutdown."),
    }
}
