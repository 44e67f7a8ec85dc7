/*!
Read-only status surface.

Handlers only read shared state; nothing here triggers a capture. The router
is built from an explicit [`AppState`] so it can be exercised without a
listening socket.
*/

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use valkey_snapshot_core::{Orchestrator, ServerConfig};

#[derive(Clone)]
pub struct AppState {
    /// Configuration with credentials already masked
    pub config: Arc<ServerConfig>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: &ServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config: Arc::new(config.redacted()),
            orchestrator,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(config_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "result": "OK" }))
}

async fn config_handler(State(state): State<AppState>) -> Json<ServerConfig> {
    Json(state.config.as_ref().clone())
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match state.orchestrator.last_report() {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::OK,
            Json(json!({ "round": null, "message": "no round has finished yet" })),
        )
            .into_response(),
    }
}

async fn metrics_handler() -> Response {
    match valkey_snapshot_core::observability::gather_metrics() {
        Some(Ok(text)) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Some(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}
