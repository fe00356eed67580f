//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector;
use crate::poller::{Poller, ScrapeOutcome};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    poller: Arc<Poller>,
}

/// Create the HTTP router.
fn create_router(poller: Arc<Poller>, metrics_path: &str) -> Router {
    let state = AppState { poller };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the /metrics endpoint. Each scrape drives (or reuses) a poll.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let outcome = state.poller.scrape().await;
    let stats = state.poller.stats();

    let (snapshot, stale) = match outcome {
        ScrapeOutcome::Fresh(snapshot) => (snapshot, false),
        ScrapeOutcome::Stale(snapshot) => (snapshot, true),
        ScrapeOutcome::NoData => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "no data - the heat pump has not answered a poll yet\n",
            )
                .into_response();
        }
    };

    let body = collector::render(&snapshot, stale, &stats, state.poller.table());

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint. Liveness plus poller counters.
async fn health_handler(State(state): State<AppState>) -> Response {
    let stats = state.poller.stats();
    Json(json!({
        "status": "healthy",
        "polls_attempted": stats.polls_attempted,
        "polls_succeeded": stats.polls_succeeded,
        "gathering_errors": stats.gathering_errors,
        "communication_errors": stats.communication_errors,
    }))
    .into_response()
}

/// Handler for the /ready endpoint. Ready once one poll has succeeded.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.poller.ready().await {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no successful poll yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    poller: Arc<Poller>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(poller: Arc<Poller>, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            poller,
            listen_addr,
            metrics_path,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    ///
    /// A bind failure is fatal; it propagates to `main` and the process
    /// exits non-zero.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.poller, &self.metrics_path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
