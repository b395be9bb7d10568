//! Query service
//!
//! The only read interface. Every read goes cache first, falls back to the
//! store on a miss and populates the cache with the kind's TTL and tags.
//! Store failures degrade to an empty body of the right shape.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use gridiron_db::{
    Database, EntityKind, Game, GameQuery, GameStatus, InjuryQuery, InjuryStatus, Player,
    PlayerQuery, Team,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheLayer, Lookup, LookupOutcome, PutOptions};
use crate::error::CoreError;
use crate::live::LiveSignal;

const EMPTY_LIST: &[u8] = b"[]";
const EMPTY_ROSTER: &[u8] = br#"{"team":null,"players":[]}"#;

/// Cache lifetimes per entity kind
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub teams_ttl: Duration,
    pub players_ttl: Duration,
    pub games_ttl: Duration,
    /// Games TTL while any game is in progress
    pub live_games_ttl: Duration,
    pub injuries_ttl: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            teams_ttl: Duration::from_secs(3600),
            players_ttl: Duration::from_secs(1800),
            games_ttl: Duration::from_secs(300),
            live_games_ttl: Duration::from_secs(30),
            injuries_ttl: Duration::from_secs(600),
        }
    }
}

/// Where a response body came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    Cache,
    Store,
    /// The store failed; the body is empty
    Unavailable,
}

impl ServedFrom {
    /// Value of the `x-cache` response header
    pub fn cache_status(&self) -> &'static str {
        match self {
            ServedFrom::Cache => "hit",
            ServedFrom::Store => "miss",
            ServedFrom::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Freshness {
    pub served_from: ServedFrom,
    /// When the cached body was produced
    pub cached_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub live: bool,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    /// JSON body
    pub body: Bytes,
    pub freshness: Freshness,
}

impl QueryResponse {
    fn from_lookup(lookup: Lookup, live: bool) -> Self {
        let freshness = match lookup.outcome {
            LookupOutcome::Hit => Freshness {
                served_from: ServedFrom::Cache,
                cached_at: Some(lookup.created_at),
                expires_at: Some(lookup.expires_at),
                live,
            },
            LookupOutcome::Inserted => Freshness {
                served_from: ServedFrom::Store,
                cached_at: Some(lookup.created_at),
                expires_at: Some(lookup.expires_at),
                live,
            },
            LookupOutcome::Uncached => Freshness {
                served_from: ServedFrom::Store,
                cached_at: None,
                expires_at: None,
                live,
            },
        };
        Self {
            body: lookup.value,
            freshness,
        }
    }

    fn unavailable(body: Bytes, live: bool) -> Self {
        Self {
            body,
            freshness: Freshness {
                served_from: ServedFrom::Unavailable,
                cached_at: None,
                expires_at: None,
                live,
            },
        }
    }
}

/// Player listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerFilter {
    /// Team id, abbreviation or name
    pub team: Option<String>,
    pub position: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

/// Game listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameFilter {
    pub season: Option<i64>,
    pub week: Option<i64>,
    pub status: Option<GameStatus>,
    /// Team id, abbreviation or name
    pub team: Option<String>,
}

/// Injury listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InjuryFilter {
    /// Team id, abbreviation or name
    pub team: Option<String>,
    pub status: Option<InjuryStatus>,
}

/// Slate selection; the current period when either part is missing
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SlateRequest {
    pub season: Option<i64>,
    pub week: Option<i64>,
}

#[derive(Debug, Serialize)]
struct Roster {
    team: Team,
    players: Vec<Player>,
}

#[derive(Debug, Serialize)]
struct TeamInjuries {
    team_id: i64,
    team: Option<String>,
    count: i64,
}

/// The published weekly slate
#[derive(Debug, Serialize)]
struct Slate {
    season: Option<i64>,
    week: Option<i64>,
    generated_at: DateTime<Utc>,
    live: bool,
    games: Vec<Game>,
    injuries_by_team: Vec<TeamInjuries>,
}

fn key_part(value: Option<&str>) -> String {
    value
        .map(|v| gridiron_db::utils::normalize_name(v))
        .unwrap_or_default()
}

fn key_num<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub struct QueryService {
    db: Database,
    cache: Arc<CacheLayer>,
    live: Arc<LiveSignal>,
    config: QueryConfig,
}

impl QueryService {
    pub fn new(
        db: Database,
        cache: Arc<CacheLayer>,
        live: Arc<LiveSignal>,
        config: QueryConfig,
    ) -> Self {
        Self {
            db,
            cache,
            live,
            config,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_live()
    }

    /// All teams
    pub async fn teams(&self) -> QueryResponse {
        let db = self.db.clone();
        self.read_or_empty(
            "query:teams".to_string(),
            self.config.teams_ttl,
            &[EntityKind::Teams],
            || async move { Ok::<_, CoreError>(db.list_teams().await?) },
            EMPTY_LIST,
        )
        .await
    }

    /// Players matching `filter`
    pub async fn players(&self, filter: PlayerFilter) -> QueryResponse {
        let key = format!(
            "query:players:{}:{}:{}:{}",
            key_part(filter.team.as_deref()),
            key_part(filter.position.as_deref()),
            key_part(filter.search.as_deref()),
            key_num(filter.limit)
        );
        let db = self.db.clone();
        self.read_or_empty(
            key,
            self.config.players_ttl,
            &[EntityKind::Players, EntityKind::Teams],
            || async move {
                let query = PlayerQuery {
                    team: filter.team,
                    position: filter.position,
                    search: filter.search,
                    limit: filter.limit,
                };
                Ok::<_, CoreError>(db.list_players(query.validated()).await?)
            },
            EMPTY_LIST,
        )
        .await
    }

    /// A team and its players
    ///
    /// Fails with `NotFound` only when the team does not exist; store errors
    /// degrade to an empty roster.
    pub async fn roster(&self, team: &str) -> Result<QueryResponse, CoreError> {
        let key = format!("query:roster:{}", key_part(Some(team)));
        let db = self.db.clone();
        let needle = team.to_string();
        let result = self
            .read(
                key,
                self.config.players_ttl,
                &[EntityKind::Players, EntityKind::Teams],
                || async move {
                    let (team, players) = db
                        .roster(&needle)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("team '{}'", needle)))?;
                    Ok::<_, CoreError>(Roster { team, players })
                },
            )
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(CoreError::NotFound(what)) => Err(CoreError::NotFound(what)),
            Err(e) => {
                warn!("Serving empty roster after store error: {}", e);
                Ok(QueryResponse::unavailable(
                    Bytes::from_static(EMPTY_ROSTER),
                    self.is_live(),
                ))
            }
        }
    }

    /// Games matching `filter`; cached briefly while live
    pub async fn games(&self, filter: GameFilter) -> QueryResponse {
        let key = format!(
            "query:games:{}:{}:{}:{}",
            key_num(filter.season),
            key_num(filter.week),
            filter.status.map(|s| s.as_str()).unwrap_or_default(),
            key_part(filter.team.as_deref())
        );
        let ttl = if self.is_live() {
            self.config.live_games_ttl
        } else {
            self.config.games_ttl
        };
        let db = self.db.clone();
        self.read_or_empty(
            key,
            ttl,
            &[EntityKind::Games, EntityKind::Teams],
            || async move {
                let team_id = match filter.team.as_deref() {
                    Some(team) => match db.find_team(team).await? {
                        Some(team) => Some(team.id),
                        None => return Ok(Vec::new()),
                    },
                    None => None,
                };
                let query = GameQuery {
                    season: filter.season,
                    week: filter.week,
                    status: filter.status,
                    team_id,
                };
                Ok::<_, CoreError>(db.list_games(query).await?)
            },
            EMPTY_LIST,
        )
        .await
    }

    /// Active injuries, optionally for one team
    pub async fn injuries(&self, filter: InjuryFilter) -> QueryResponse {
        let key = format!(
            "query:injuries:{}:{}",
            key_part(filter.team.as_deref()),
            filter.status.map(|s| s.as_str()).unwrap_or_default()
        );
        let db = self.db.clone();
        self.read_or_empty(
            key,
            self.config.injuries_ttl,
            &[EntityKind::Injuries, EntityKind::Players, EntityKind::Teams],
            || async move {
                let team_id = match filter.team.as_deref() {
                    Some(team) => match db.find_team(team).await? {
                        Some(team) => Some(team.id),
                        None => return Ok(Vec::new()),
                    },
                    None => None,
                };
                let query = InjuryQuery {
                    team_id,
                    status: filter.status,
                    include_inactive: false,
                };
                Ok::<_, CoreError>(db.list_injuries(query).await?)
            },
            EMPTY_LIST,
        )
        .await
    }

    /// The weekly slate, stable for every reader within the same period
    ///
    /// A missing week is that season's current week; a missing season is the
    /// latest stored one.
    pub async fn picks(&self, request: SlateRequest) -> QueryResponse {
        let live = self.is_live();
        let period = match (request.season, request.week) {
            (Some(season), Some(week)) => Ok((Some(season), Some(week))),
            (Some(season), None) => self
                .db
                .current_week(season)
                .await
                .map(|week| (Some(season), week)),
            (None, week) => self.db.current_period().await.map(|current| match current {
                Some((season, current_week)) => (Some(season), Some(week.unwrap_or(current_week))),
                None => (None, week),
            }),
        };
        let (season, week) = match period {
            Ok(period) => period,
            Err(e) => {
                warn!("Serving empty slate after store error: {}", e);
                return QueryResponse::unavailable(self.empty_slate(None, None, live), live);
            }
        };

        let context = format!("{}-{}", key_num(season), key_num(week));
        let options = PutOptions::default()
            .tags([
                EntityKind::Games.as_str(),
                EntityKind::Injuries.as_str(),
                EntityKind::Teams.as_str(),
            ])
            .persistent();
        let db = self.db.clone();
        let generated_at = self.cache.clock().now();

        let result = self
            .cache
            .get_or_insert_deterministic("picks", &context, live, options, || async move {
                let games = match (season, week) {
                    (Some(season), Some(week)) => {
                        db.list_games(GameQuery {
                            season: Some(season),
                            week: Some(week),
                            ..Default::default()
                        })
                        .await?
                    }
                    _ => Vec::new(),
                };
                let names: HashMap<i64, String> = db
                    .list_teams()
                    .await?
                    .into_iter()
                    .map(|t| (t.id, t.name))
                    .collect();
                let injuries_by_team = db
                    .injury_counts_by_team()
                    .await?
                    .into_iter()
                    .map(|(team_id, count)| TeamInjuries {
                        team_id,
                        team: names.get(&team_id).cloned(),
                        count,
                    })
                    .collect();
                let slate = Slate {
                    season,
                    week,
                    generated_at,
                    live,
                    games,
                    injuries_by_team,
                };
                Ok::<_, CoreError>(Bytes::from(serde_json::to_vec(&slate)?))
            })
            .await;

        match result {
            Ok((period, lookup)) => {
                debug!("Slate {} served ({:?})", period.key, lookup.outcome);
                QueryResponse::from_lookup(lookup, live)
            }
            Err(e) => {
                warn!("Serving empty slate after store error: {}", e);
                QueryResponse::unavailable(self.empty_slate(season, week, live), live)
            }
        }
    }

    fn empty_slate(&self, season: Option<i64>, week: Option<i64>, live: bool) -> Bytes {
        let slate = Slate {
            season,
            week,
            generated_at: self.cache.clock().now(),
            live,
            games: Vec::new(),
            injuries_by_team: Vec::new(),
        };
        serde_json::to_vec(&slate)
            .map(Bytes::from)
            .unwrap_or_else(|_| Bytes::from_static(b"{}"))
    }

    async fn read<T, F, Fut>(
        &self,
        key: String,
        ttl: Duration,
        tags: &[EntityKind],
        load: F,
    ) -> Result<QueryResponse, CoreError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let live = self.is_live();
        let options = PutOptions::new(ttl).tags(tags.iter().map(|k| k.as_str()));
        let lookup = self
            .cache
            .get_or_insert_with(&key, options, || async move {
                let value = load().await?;
                Ok::<_, CoreError>(Bytes::from(serde_json::to_vec(&value)?))
            })
            .await?;
        Ok(QueryResponse::from_lookup(lookup, live))
    }

    async fn read_or_empty<T, F, Fut>(
        &self,
        key: String,
        ttl: Duration,
        tags: &[EntityKind],
        load: F,
        empty: &'static [u8],
    ) -> QueryResponse
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        match self.read(key.clone(), ttl, tags, load).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Serving empty {} after store error: {}", key, e);
                QueryResponse::unavailable(Bytes::from_static(empty), self.is_live())
            }
        }
    }
}
