//! Cached read endpoints
//!
//! Every handler returns the JSON body prepared by the query service along
//! with freshness headers. Upstream trouble never surfaces here: at worst the
//! body is empty and `x-cache` reads `unavailable`.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use gridiron_core::{GameFilter, InjuryFilter, PlayerFilter, QueryResponse, SlateRequest};

use crate::error::ApiError;
use crate::state::AppState;

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_EXPIRES: &str = "x-cache-expires";
pub const X_DATA_LIVE: &str = "x-data-live";

/// A query response rendered with freshness headers
pub struct Cached(pub QueryResponse);

impl IntoResponse for Cached {
    fn into_response(self) -> Response {
        let freshness = &self.0.freshness;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            X_CACHE,
            HeaderValue::from_static(freshness.served_from.cache_status()),
        );
        if let Some(expires) = freshness.expires_at
            && let Ok(value) = HeaderValue::from_str(&expires.to_rfc3339())
        {
            headers.insert(X_CACHE_EXPIRES, value);
        }
        headers.insert(
            X_DATA_LIVE,
            HeaderValue::from_static(if freshness.live { "true" } else { "false" }),
        );

        (headers, self.0.body).into_response()
    }
}

// ==================== Read Routes ====================

/// GET /teams
async fn list_teams(State(state): State<AppState>) -> Cached {
    Cached(state.query.teams().await)
}

/// GET /players?team=&position=&search=&limit=
async fn list_players(
    State(state): State<AppState>,
    Query(filter): Query<PlayerFilter>,
) -> Cached {
    Cached(state.query.players(filter).await)
}

/// GET /teams/{id}/roster
async fn team_roster(
    State(state): State<AppState>,
    Path(team): Path<String>,
) -> Result<Cached, ApiError> {
    if team.trim().is_empty() {
        return Err(ApiError::BadRequest("team cannot be empty".to_string()));
    }
    Ok(Cached(state.query.roster(&team).await?))
}

/// GET /games?season=&week=&status=&team=
async fn list_games(State(state): State<AppState>, Query(filter): Query<GameFilter>) -> Cached {
    Cached(state.query.games(filter).await)
}

/// GET /injuries?team=&status=
async fn list_injuries(
    State(state): State<AppState>,
    Query(filter): Query<InjuryFilter>,
) -> Cached {
    Cached(state.query.injuries(filter).await)
}

/// GET /picks?season=&week=
async fn weekly_picks(
    State(state): State<AppState>,
    Query(request): Query<SlateRequest>,
) -> Cached {
    Cached(state.query.picks(request).await)
}

/// Create read routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/teams", get(list_teams))
        .route("/teams/{id}/roster", get(team_roster))
        .route("/players", get(list_players))
        .route("/games", get(list_games))
        .route("/injuries", get(list_injuries))
        .route("/picks", get(weekly_picks))
}
