//! API Routes
//!
//! Read-only HTTP endpoints over the peer store, plus health and metrics

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::Metrics;
use crate::config::MonitorConfig;
use crate::monitor::SweepGuard;
use crate::store::PeerStore;
use crate::types::{normalize_address, PeerState};

/// Shared API state
pub struct ApiState {
    pub config: Arc<MonitorConfig>,
    pub store: Arc<RwLock<PeerStore>>,
    pub guard: Arc<SweepGuard>,
    pub metrics: Arc<Metrics>,
}

/// Run the HTTP API server
pub async fn run_api_server(
    config: Arc<MonitorConfig>,
    store: Arc<RwLock<PeerStore>>,
    guard: Arc<SweepGuard>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let port = config.api_port;
    let state = Arc::new(ApiState {
        config,
        store,
        guard,
        metrics,
    });

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("📊 HTTP API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health_check))
        .route("/status", get(get_status))

        // Peers
        .route("/peers", get(get_peers))
        .route("/peers/:address", get(get_peer))
        .route("/stats", get(get_stats))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .with_state(state)
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /status - Monitor status
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let store = state.store.read().await;
    let metrics = state.metrics.snapshot();

    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": metrics.uptime_secs,
        "sweep_running": state.guard.is_running(),
        "reference_height": metrics.reference_height,
        "last_sweep_timestamp": metrics.last_sweep_timestamp,
        "last_check": store.last_check(),
        "peers": {
            "total": store.total_count(),
            "online": store.count_by_state(PeerState::Online),
        }
    }))
}

#[derive(Debug, Deserialize)]
struct PeersQuery {
    state: Option<String>,
}

/// GET /peers?state=online - Stored peers in presentation order
async fn get_peers(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PeersQuery>,
) -> Response {
    let filter = match query.state.as_deref().map(str::parse::<PeerState>) {
        None => None,
        Some(Ok(s)) => Some(s),
        Some(Err(e)) => {
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e })))
                .into_response();
        }
    };

    let store = state.store.read().await;
    let peers: Vec<_> = store
        .list()
        .into_iter()
        .filter(|p| filter.map_or(true, |s| p.state == s))
        .collect();

    Json(serde_json::json!({
        "count": peers.len(),
        "peers": peers,
    }))
    .into_response()
}

/// GET /peers/:address - One stored peer
async fn get_peer(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Response {
    let address = normalize_address(&address, state.config.default_p2p_port);
    let store = state.store.read().await;

    match store.get(&address) {
        Some(peer) => Json(peer).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Peer not found" })),
        )
            .into_response(),
    }
}

/// GET /stats - Aggregate counts for dashboards
async fn get_stats(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.store.read().await.stats())
}

/// Refresh the store gauges before exporting
async fn refresh_gauges(state: &ApiState) {
    let store = state.store.read().await;
    state.metrics.set_peers_total(store.total_count() as u64);
    for peer_state in PeerState::ALL {
        state
            .metrics
            .set_state_count(peer_state, store.count_by_state(peer_state) as u64);
    }
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    refresh_gauges(&state).await;

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    refresh_gauges(&state).await;
    Json(state.metrics.snapshot())
}
