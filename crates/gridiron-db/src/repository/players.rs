//! Player operations

use chrono::Utc;
use sqlx::{Row, SqliteConnection};

use crate::error::{DbError, ValidationError};
use crate::models::{NewPlayer, Player, PlayerRef, Team, UpsertAction, UpsertOutcome};
use crate::repository::Database;
use crate::repository::teams::{require_team_id, resolve_team_id};
use crate::utils::{non_blank, normalize_name};

const PLAYER_SELECT: &str = r#"
    SELECT p.id, p.external_id, p.name, p.position, p.team_id, t.name AS team_name,
           p.jersey_number, p.height, p.weight, p.age, p.experience_years, p.college,
           p.status, p.created_at, p.updated_at
    FROM players p
    JOIN teams t ON t.id = p.team_id
"#;

const MAX_PLAYER_LIMIT: i64 = 500;

/// Query parameters for listing players
#[derive(Debug, Clone, Default)]
pub struct PlayerQuery {
    /// Team id, abbreviation or name
    pub team: Option<String>,
    /// Exact position, case-insensitive
    pub position: Option<String>,
    /// Substring of the player name
    pub search: Option<String>,
    pub limit: Option<i64>,
}

impl PlayerQuery {
    /// Clamp the limit into a sane range
    pub fn validated(mut self) -> Self {
        self.limit = Some(
            self.limit
                .unwrap_or(MAX_PLAYER_LIMIT)
                .clamp(1, MAX_PLAYER_LIMIT),
        );
        self
    }
}

/// Resolve a player reference to a row id inside an open transaction
pub(crate) async fn resolve_player_id(
    conn: &mut SqliteConnection,
    player: &PlayerRef,
) -> Result<Option<i64>, DbError> {
    let id = match player {
        PlayerRef::Id(id) => {
            sqlx::query_scalar::<_, i64>("SELECT id FROM players WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
        }
        PlayerRef::ExternalId(ext) => {
            sqlx::query_scalar::<_, i64>("SELECT id FROM players WHERE external_id = ? LIMIT 1")
                .bind(ext.trim())
                .fetch_optional(&mut *conn)
                .await?
        }
        PlayerRef::NameOnTeam { name, team } => {
            let Some(team_id) = resolve_team_id(conn, team).await? else {
                return Ok(None);
            };
            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM players WHERE team_id = ? AND lower(name) = ? LIMIT 1",
            )
            .bind(team_id)
            .bind(normalize_name(name))
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(id)
}

fn merged_text<'a>(incoming: &'a Option<String>, current: &'a Option<String>) -> Option<&'a str> {
    non_blank(incoming).or(current.as_deref())
}

fn merged_num(incoming: Option<i64>, current: Option<i64>) -> Option<i64> {
    incoming.or(current)
}

impl Player {
    /// Whether applying `update` (already resolved to `team_id`) would leave this row as it is
    fn absorbs(&self, update: &NewPlayer, team_id: i64) -> bool {
        self.name == update.name.trim()
            && self.team_id == team_id
            && merged_text(&update.external_id, &self.external_id) == self.external_id.as_deref()
            && merged_text(&update.position, &self.position) == self.position.as_deref()
            && merged_text(&update.height, &self.height) == self.height.as_deref()
            && merged_text(&update.college, &self.college) == self.college.as_deref()
            && merged_text(&update.status, &self.status) == self.status.as_deref()
            && merged_num(update.jersey_number, self.jersey_number) == self.jersey_number
            && merged_num(update.weight, self.weight) == self.weight
            && merged_num(update.age, self.age) == self.age
            && merged_num(update.experience_years, self.experience_years)
                == self.experience_years
    }
}

impl Database {
    // ==================== Player Operations ====================

    /// Insert or update a player
    ///
    /// The team must already exist. A player first seen without an external id
    /// is matched by name and team, and adopts the external id once one arrives.
    pub async fn upsert_player(&self, player: &NewPlayer) -> Result<UpsertOutcome, DbError> {
        player.validate()?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let team_id = require_team_id(&mut *tx, &player.team, "player").await?;
        let natural_key = player.natural_key(team_id);
        let name_key = format!("name:{}@{}", normalize_name(&player.name), team_id);

        let existing = sqlx::query(&format!(
            "{} WHERE p.natural_key = ? OR (p.natural_key = ? AND p.external_id IS NULL) \
             ORDER BY p.natural_key = ? DESC LIMIT 1",
            PLAYER_SELECT
        ))
        .bind(&natural_key)
        .bind(&name_key)
        .bind(&natural_key)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| Player::try_from(&row))
        .transpose()?;

        let outcome = match existing {
            None => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO players (natural_key, external_id, name, position, team_id, jersey_number,
                                         height, weight, age, experience_years, college, status,
                                         created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&natural_key)
                .bind(non_blank(&player.external_id))
                .bind(player.name.trim())
                .bind(non_blank(&player.position))
                .bind(team_id)
                .bind(player.jersey_number)
                .bind(non_blank(&player.height))
                .bind(player.weight)
                .bind(player.age)
                .bind(player.experience_years)
                .bind(non_blank(&player.college))
                .bind(non_blank(&player.status))
                .bind(&now)
                .bind(&now)
                .fetch_one(&mut *tx)
                .await?;
                UpsertOutcome::new(row.get("id"), UpsertAction::Inserted)
            }
            Some(current) if current.absorbs(player, team_id) => {
                UpsertOutcome::new(current.id, UpsertAction::Unchanged)
            }
            Some(current) => {
                sqlx::query(
                    r#"
                    UPDATE players
                    SET natural_key = ?,
                        external_id = COALESCE(?, external_id),
                        name = ?,
                        position = COALESCE(?, position),
                        team_id = ?,
                        jersey_number = COALESCE(?, jersey_number),
                        height = COALESCE(?, height),
                        weight = COALESCE(?, weight),
                        age = COALESCE(?, age),
                        experience_years = COALESCE(?, experience_years),
                        college = COALESCE(?, college),
                        status = COALESCE(?, status),
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&natural_key)
                .bind(non_blank(&player.external_id))
                .bind(player.name.trim())
                .bind(non_blank(&player.position))
                .bind(team_id)
                .bind(player.jersey_number)
                .bind(non_blank(&player.height))
                .bind(player.weight)
                .bind(player.age)
                .bind(player.experience_years)
                .bind(non_blank(&player.college))
                .bind(non_blank(&player.status))
                .bind(&now)
                .bind(current.id)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::new(current.id, UpsertAction::Updated)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Get a player by row id
    pub async fn get_player(&self, id: i64) -> Result<Option<Player>, DbError> {
        let result = sqlx::query(&format!("{} WHERE p.id = ?", PLAYER_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| Player::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// List players with optional filters
    ///
    /// An unknown team filter yields an empty list rather than an error.
    pub async fn list_players(&self, query: PlayerQuery) -> Result<Vec<Player>, DbError> {
        let query = query.validated();
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(team) = non_blank(&query.team) {
            let Some(found) = self.find_team(team).await? else {
                return Ok(Vec::new());
            };
            conditions.push("p.team_id = ?");
            params.push(found.id.to_string());
        }
        if let Some(position) = non_blank(&query.position) {
            conditions.push("upper(p.position) = upper(?)");
            params.push(position.to_string());
        }
        if let Some(search) = non_blank(&query.search) {
            conditions.push("lower(p.name) LIKE ?");
            params.push(format!("%{}%", search.to_lowercase()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "{} {} ORDER BY t.name, p.name LIMIT ?",
            PLAYER_SELECT, where_clause
        );
        let mut players_query = sqlx::query(&sql);
        for param in &params {
            players_query = players_query.bind(param);
        }
        players_query = players_query.bind(query.limit.unwrap_or(MAX_PLAYER_LIMIT));

        let rows = players_query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| Player::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// A team and its players, or `None` for an unknown team
    pub async fn roster(&self, team: &str) -> Result<Option<(Team, Vec<Player>)>, DbError> {
        let Some(team) = self.find_team(team).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(&format!(
            "{} WHERE p.team_id = ? ORDER BY p.position, p.jersey_number, p.name",
            PLAYER_SELECT
        ))
        .bind(team.id)
        .fetch_all(&self.pool)
        .await?;

        let players = rows
            .iter()
            .map(|row| Player::try_from(row).map_err(DbError::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some((team, players)))
    }
}

/// Resolve or reject with a validation error
pub(crate) async fn require_player_id(
    conn: &mut SqliteConnection,
    player: &PlayerRef,
    entity: &'static str,
) -> Result<i64, DbError> {
    resolve_player_id(conn, player).await?.ok_or_else(|| {
        DbError::Validation(ValidationError::UnresolvedReference {
            entity,
            reference: player.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, TeamRef};
    use crate::repository::test_support::*;

    #[tokio::test]
    async fn test_orphan_player_is_rejected() {
        let db = db().await;
        let player = NewPlayer::new("Nobody", abbr("XYZ"));

        let err = db.upsert_player(&player).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Validation(ValidationError::UnresolvedReference { entity: "player", .. })
        ));
        assert_eq!(db.count(EntityKind::Players).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_player_idempotent_and_updates() {
        let db = db().await;
        db.upsert_team(&team("Kansas City Chiefs", "KC")).await.unwrap();

        let mut player = NewPlayer::new("Patrick Mahomes", abbr("KC"));
        player.position = Some("QB".to_string());
        player.jersey_number = Some(15);

        let first = db.upsert_player(&player).await.unwrap();
        assert_eq!(first.action, UpsertAction::Inserted);
        let second = db.upsert_player(&player).await.unwrap();
        assert_eq!(second, UpsertOutcome::new(first.id, UpsertAction::Unchanged));

        player.age = Some(29);
        let third = db.upsert_player(&player).await.unwrap();
        assert_eq!(third.action, UpsertAction::Updated);

        let stored = db.get_player(first.id).await.unwrap().unwrap();
        assert_eq!(stored.age, Some(29));
        assert_eq!(stored.team_name, "Kansas City Chiefs");
        assert_eq!(db.count(EntityKind::Players).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_player_adopts_external_id() {
        let db = db().await;
        db.upsert_team(&team("Buffalo Bills", "BUF")).await.unwrap();

        let first = db
            .upsert_player(&NewPlayer::new("Josh Allen", abbr("BUF")))
            .await
            .unwrap();

        let mut with_ext = NewPlayer::new("Josh Allen", abbr("BUF"));
        with_ext.external_id = Some("3918298".to_string());
        let second = db.upsert_player(&with_ext).await.unwrap();
        assert_eq!(second.id, first.id);

        let third = db.upsert_player(&with_ext).await.unwrap();
        assert_eq!(third, UpsertOutcome::new(first.id, UpsertAction::Unchanged));
        assert_eq!(db.count(EntityKind::Players).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_players_filters() {
        let db = db().await;
        db.upsert_team(&team("Kansas City Chiefs", "KC")).await.unwrap();
        db.upsert_team(&team("Buffalo Bills", "BUF")).await.unwrap();

        for (name, team_abbr, position) in [
            ("Patrick Mahomes", "KC", "QB"),
            ("Travis Kelce", "KC", "TE"),
            ("Josh Allen", "BUF", "QB"),
        ] {
            let mut player = NewPlayer::new(name, abbr(team_abbr));
            player.position = Some(position.to_string());
            db.upsert_player(&player).await.unwrap();
        }

        let qbs = db
            .list_players(PlayerQuery {
                position: Some("qb".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(qbs.len(), 2);

        let chiefs = db
            .list_players(PlayerQuery {
                team: Some("KC".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(chiefs.len(), 2);
        assert!(chiefs.iter().all(|p| p.team_name == "Kansas City Chiefs"));

        let unknown = db
            .list_players(PlayerQuery {
                team: Some("Nowhere".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(unknown.is_empty());

        let limited = db
            .list_players(PlayerQuery {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_roster_by_abbreviation() {
        let db = db().await;
        let team_id = db.upsert_team(&team("Detroit Lions", "DET")).await.unwrap().id;
        db.upsert_player(&NewPlayer::new("Jared Goff", TeamRef::Id(team_id)))
            .await
            .unwrap();

        let (found, players) = db.roster("det").await.unwrap().unwrap();
        assert_eq!(found.id, team_id);
        assert_eq!(players.len(), 1);
        assert!(db.roster("Nowhere").await.unwrap().is_none());
    }

    #[test]
    fn test_player_query_validated_clamps_limit() {
        let query = PlayerQuery {
            limit: Some(10_000),
            ..Default::default()
        }
        .validated();
        assert_eq!(query.limit, Some(MAX_PLAYER_LIMIT));

        let query = PlayerQuery::default().validated();
        assert_eq!(query.limit, Some(MAX_PLAYER_LIMIT));
    }
}
