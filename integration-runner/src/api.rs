//! Integration Runner HTTP API - status surface for the dashboard.
//!
//! Exposes four routes:
//! - `GET /health` - liveness probe
//! - `GET /api/status` - per-account integration status
//! - `GET /api/snapshots` - latest widget snapshot per account
//! - `GET /api/metrics` - credential lifecycle counters

use crate::integration::{SnapshotStore, WidgetSnapshot};
use crate::scheduler::IntegrationStatus;
use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use beacon::credential::{CredentialMetrics, CredentialMetricsSnapshot};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Status trackers keyed by account key string.
pub type StatusMap =
    Arc<tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<IntegrationStatus>>>>>;

/// Shared state for the status API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub statuses: StatusMap,
    pub snapshots: Arc<SnapshotStore>,
    pub metrics: CredentialMetrics,
}

/// A single entry in the `GET /api/status` response.
#[derive(Serialize)]
pub struct IntegrationInfo {
    pub account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub poll_count: u64,
    pub error_count: u64,
}

/// Builds the status API router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/snapshots", get(get_snapshots))
        .route("/api/metrics", get(get_metrics))
        .with_state(Arc::new(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<Vec<IntegrationInfo>> {
    let map = state.statuses.lock().await;

    let mut entries = Vec::with_capacity(map.len());
    for (account, status) in map.iter() {
        let status = status.lock().await.clone();
        entries.push(IntegrationInfo {
            account: account.clone(),
            last_poll: status.last_poll.map(|t| t.to_rfc3339()),
            last_error: status.last_error,
            poll_count: status.poll_count,
            error_count: status.error_count,
        });
    }
    entries.sort_by(|a, b| a.account.cmp(&b.account));

    Json(entries)
}

async fn get_snapshots(State(state): State<Arc<ApiState>>) -> Json<Vec<WidgetSnapshot>> {
    Json(state.snapshots.all())
}

async fn get_metrics(State(state): State<Arc<ApiState>>) -> Json<CredentialMetricsSnapshot> {
    Json(state.metrics.snapshot())
}
