//! Integration tests for the agent API endpoints

use advisor_lib::{
    config as advisor_config,
    config::AdvisorConfig,
    AgentCondition, AgentStatus, CpuResourceAdvisor, CpuSet, CpuTopology, HeadroomProvider,
    MetaCache, MetaCacheImpl, MetaServer, PoolInfo, POOL_NAME_RESERVE,
};
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tower::ServiceExt;

#[derive(Clone)]
pub struct AppState {
    pub status: AgentStatus,
    pub headroom: HeadroomProvider,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.status.report();
    let status_code = match report.condition {
        AgentCondition::Ok | AgentCondition::Degraded => StatusCode::OK,
        AgentCondition::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(report))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.status.readiness();
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn headroom(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.headroom.get_headroom().await {
        Ok(cpus) => (StatusCode::OK, Json(json!({ "cpus": cpus }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/headroom", get(headroom))
        .with_state(state)
}

/// Reserve pool of one CPU per NUMA on a 16-CPU / 2-NUMA machine.
fn reserve_pool() -> PoolInfo {
    PoolInfo {
        pool_name: POOL_NAME_RESERVE.to_string(),
        topology_aware_assignments: BTreeMap::from([
            (0, CpuSet::from_ids([0])),
            (1, CpuSet::from_ids([8])),
        ]),
        region_names: BTreeSet::new(),
    }
}

fn setup_test_app(seed_reserve: bool) -> (Router, Arc<AppState>) {
    let cache = Arc::new(MetaCacheImpl::new());
    if seed_reserve {
        cache.set_pool_info(POOL_NAME_RESERVE, reserve_pool()).unwrap();
    }
    let meta_server = Arc::new(MetaServer::new(CpuTopology::uniform(2, 8)));
    let conf = advisor_config::shared(AdvisorConfig::default());
    let (advisor, _trigger_tx, _plan_rx) = CpuResourceAdvisor::new(conf, cache, meta_server);

    let state = Arc::new(AppState {
        status: AgentStatus::new(),
        headroom: advisor.headroom_provider(),
    });
    let router = create_test_router(state.clone());

    (router, state)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_running() {
    let (app, _state) = setup_test_app(true);

    let (status, report) = get_json(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["condition"], "ok");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app(true);
    state.status.set_degraded("sysfs unavailable");

    // Degraded still returns 200 (operational)
    let (status, report) = get_json(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["condition"], "degraded");
    assert_eq!(report["reason"], "sysfs unavailable");
}

#[tokio::test]
async fn test_healthz_returns_503_when_advisor_stopped() {
    let (app, state) = setup_test_app(true);
    state.status.mark_advisor_stopped();

    let (status, report) = get_json(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(report["condition"], "down");
}

#[tokio::test]
async fn test_readyz_follows_agent_status() {
    let (app, state) = setup_test_app(true);

    let (status, _) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    state.status.set_ready();
    let (status, readiness) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);

    // A stopped advisor drops readiness again.
    state.status.mark_advisor_stopped();
    let (status, readiness) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_headroom_reports_idle_cpus() {
    let (app, _state) = setup_test_app(true);

    // No regions yet: everything but the reserve pool is headroom.
    let (status, body) = get_json(app, "/headroom").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cpus"], 14);
}

#[tokio::test]
async fn test_headroom_without_reserve_pool_is_unavailable() {
    let (app, _state) = setup_test_app(false);

    let (status, body) = get_json(app, "/headroom").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("reserve pool"));
}
