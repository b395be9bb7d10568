//! Cache administration routes

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use gridiron_core::CacheStats;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InvalidateParams {
    pub tag: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub invalidated: usize,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
}

// ==================== Cache Routes ====================

/// GET /cache/stats
async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let stats = state.cache.stats();

    let hit_rate = if stats.hits + stats.misses > 0 {
        stats.hits as f64 / (stats.hits + stats.misses) as f64
    } else {
        0.0
    };

    Json(CacheStatsResponse { stats, hit_rate })
}

/// POST /cache/invalidate?tag= or ?key=
async fn invalidate(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let invalidated = match (params.tag, params.key) {
        (Some(tag), None) if !tag.trim().is_empty() => {
            info!("Invalidating cache tag {}", tag);
            state.cache.invalidate_tag(tag.trim()).await
        }
        (None, Some(key)) if !key.is_empty() => {
            info!("Invalidating cache key {}", key);
            usize::from(state.cache.invalidate(&key).await)
        }
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of 'tag' or 'key' is required".to_string(),
            ));
        }
    };

    Ok(Json(InvalidateResponse { invalidated }))
}

/// Create cache routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/invalidate", post(invalidate))
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{json_body, seed_team, send, state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let state = state().await;
        seed_team(&state, "Kansas City Chiefs", "KC").await;

        send(&state, "GET", "/teams").await;
        send(&state, "GET", "/teams").await;

        let stats = json_body(send(&state, "GET", "/cache/stats").await).await;
        assert_eq!(stats["entries"], 1);
        assert_eq!(stats["hits"], 1);
        assert_eq!(stats["misses"], 1);
        assert_eq!(stats["hit_rate"], 0.5);

        let response = send(&state, "POST", "/cache/invalidate?tag=teams").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["invalidated"], 1);
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_requires_target() {
        let state = state().await;
        let response = send(&state, "POST", "/cache/invalidate").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&state, "POST", "/cache/invalidate?tag=teams&key=query:teams").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
