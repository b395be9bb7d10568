//! Health check endpoints

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use gridiron_db::{Database, DbError, EntityKind};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::state::AppState;

/// Health status response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub live: bool,
    pub sync_running: bool,
    /// When the most recent sync log entry was written
    pub last_sync: Option<DateTime<Utc>>,
    /// Stored row counts per entity kind
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub records: BTreeMap<&'static str, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct StoreProbe {
    last_sync: Option<DateTime<Utc>>,
    records: BTreeMap<&'static str, i64>,
}

async fn probe(db: &Database) -> Result<StoreProbe, DbError> {
    db.ping().await?;

    let mut records = BTreeMap::new();
    for kind in [
        EntityKind::Teams,
        EntityKind::Players,
        EntityKind::Games,
        EntityKind::Injuries,
    ] {
        records.insert(kind.as_str(), db.count(kind).await?);
    }
    let last_sync = db.last_sync(None).await?.map(|entry| entry.created_at);

    Ok(StoreProbe { last_sync, records })
}

/// Health check handler
///
/// Healthy means the store answers; upstream availability is reported by
/// `/sync/status` instead.
async fn health(State(state): State<AppState>) -> Response {
    // Record health check metric
    metrics::counter!("gridiron_health_checks_total").increment(1);

    let (code, status, store, error) = match probe(&state.db).await {
        Ok(store) => (StatusCode::OK, "healthy", Some(store), None),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "unhealthy",
                None,
                Some(e.to_string()),
            )
        }
    };
    let (last_sync, records) = store
        .map(|s| (s.last_sync, s.records))
        .unwrap_or_default();

    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        live: state.query.is_live(),
        sync_running: state.sync.is_running(),
        last_sync,
        records,
        error,
    };

    (code, Json(body)).into_response()
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
}
