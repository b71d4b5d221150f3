//! HTTP API for health checks, Prometheus metrics and headroom queries

use advisor_lib::{AgentCondition, AgentStatus, HeadroomProvider};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub status: AgentStatus,
    pub headroom: HeadroomProvider,
}

impl AppState {
    pub fn new(status: AgentStatus, headroom: HeadroomProvider) -> Self {
        Self { status, headroom }
    }
}

/// Health check - 200 while the advisor task lives, 503 once it stopped
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.status.report();

    let status_code = match report.condition {
        AgentCondition::Ok | AgentCondition::Degraded => StatusCode::OK,
        AgentCondition::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(report))
}

/// Readiness check - 200 once the advisor wiring is up
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.status.readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Node reclaim headroom as seen by the advisor
async fn headroom(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.headroom.get_headroom().await {
        Ok(cpus) => (StatusCode::OK, Json(json!({ "cpus": cpus }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/headroom", get(headroom))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
