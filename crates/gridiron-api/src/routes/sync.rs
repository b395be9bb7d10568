//! Sync control routes

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gridiron_core::{SyncStatus, TriggerOutcome};
use gridiron_db::{SyncLogEntry, SyncLogQuery};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SyncLogParams {
    pub source: Option<String>,
    pub run_id: Option<String>,
    pub success: Option<bool>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct SyncLogResponse {
    pub entries: Vec<SyncLogEntry>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

// ==================== Sync Routes ====================

/// POST /sync
///
/// Answers immediately; the run continues in the background.
async fn trigger_sync(State(state): State<AppState>) -> Response {
    let outcome = state.sync.trigger();
    match &outcome {
        TriggerOutcome::Started { run_id } => {
            info!(run_id = %run_id, "Manual sync started");
            (StatusCode::ACCEPTED, Json(outcome)).into_response()
        }
        TriggerOutcome::Rejected { .. } => (StatusCode::CONFLICT, Json(outcome)).into_response(),
    }
}

/// GET /sync/status
async fn sync_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.sync.status())
}

/// GET /sync/log
async fn sync_log(
    State(state): State<AppState>,
    Query(params): Query<SyncLogParams>,
) -> Result<Json<SyncLogResponse>, ApiError> {
    let query = SyncLogQuery {
        source: params.source,
        run_id: params.run_id,
        success: params.success,
        offset: params.offset,
        limit: params.limit,
    }
    .validated();
    let (offset, limit) = (query.offset, query.limit);

    let (entries, total) = state.db.list_sync_log(query).await?;

    Ok(Json(SyncLogResponse {
        entries,
        total,
        offset,
        limit,
    }))
}

/// Create sync routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(trigger_sync))
        .route("/sync/status", get(sync_status))
        .route("/sync/log", get(sync_log))
}
