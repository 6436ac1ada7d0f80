pub mod monitoring;
use crate::state::AppState;
use prometheus_client::encoding::text::encode;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use monitoring::QUEUE_METRICS;
use std::net::SocketAddr;
use std::sync::Arc;

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

/// Registers the queue metrics and serves `/health` and `/metrics` on `addr` until the
/// shutdown token is cancelled.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    {
        let mut registry = state.registry.write().await;

        QUEUE_METRICS
            .get_or_init(|| async { monitoring::QueueMetrics::register(&mut registry, "queue") })
            .await;

        monitoring::register_build_info_metric(&mut registry, "relay");
    }

    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await;
        if let Err(err) = served {
            log::error!("Metrics server stopped with an error: {}", err);
        }
    });

    Ok(server_handle)
}
