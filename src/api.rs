use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::poll::scheduler::{Scheduler, SchedulerStatus};
use crate::sink::MemorySink;

/// Shared state behind the operational endpoints. The pipeline itself
/// never depends on this module; it exists for visibility and manual
/// triggering only.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub recent: Arc<MemorySink>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/poll-now", post(poll_now))
        .route("/updates/recent", get(recent_updates))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

#[derive(serde::Serialize)]
struct PollNowResp {
    started: bool,
}

/// Kick off an out-of-band cycle. `started: false` means a cycle is
/// already in flight; the caller can just wait for it.
async fn poll_now(State(state): State<AppState>) -> Json<PollNowResp> {
    let started = state.scheduler.poll_now();
    Json(PollNowResp { started })
}

#[derive(Deserialize)]
struct RecentQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn recent_updates(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Json<Vec<crate::poll::types::DetectedUpdate>> {
    Json(state.recent.snapshot_last_n(q.limit.min(500)))
}
