//! Game operations

use chrono::Utc;
use sqlx::Row;

use crate::error::{DbError, ValidationError};
use crate::models::{Game, GameStatus, NewGame, UpsertAction, UpsertOutcome};
use crate::repository::Database;
use crate::repository::teams::require_team_id;
use crate::utils::non_blank;

const GAME_SELECT: &str = r#"
    SELECT g.id, g.external_id, g.season, g.week,
           g.home_team_id, h.name AS home_team, g.away_team_id, a.name AS away_team,
           g.scheduled_at, g.status, g.home_score, g.away_score, g.venue,
           g.created_at, g.updated_at
    FROM games g
    JOIN teams h ON h.id = g.home_team_id
    JOIN teams a ON a.id = g.away_team_id
"#;

/// Query parameters for listing games
#[derive(Debug, Clone, Default)]
pub struct GameQuery {
    pub season: Option<i64>,
    pub week: Option<i64>,
    pub status: Option<GameStatus>,
    /// Only games involving this team row
    pub team_id: Option<i64>,
}

impl Game {
    fn absorbs(&self, update: &NewGame, home_team_id: i64, away_team_id: i64) -> bool {
        self.season == update.season
            && self.week == update.week
            && self.home_team_id == home_team_id
            && self.away_team_id == away_team_id
            && self.status == update.status
            && update.scheduled_at.or(self.scheduled_at) == self.scheduled_at
            && update.home_score.or(self.home_score) == self.home_score
            && update.away_score.or(self.away_score) == self.away_score
            && non_blank(&update.venue).or(self.venue.as_deref()) == self.venue.as_deref()
    }
}

impl Database {
    // ==================== Game Operations ====================

    /// Insert or update a game keyed by its external id
    ///
    /// Status only moves forward: a record whose status ranks below the
    /// stored one is ignored entirely, scores included.
    pub async fn upsert_game(&self, game: &NewGame) -> Result<UpsertOutcome, DbError> {
        game.validate()?;
        let external_id = game.external_id.trim();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let home_team_id = require_team_id(&mut *tx, &game.home_team, "game").await?;
        let away_team_id = require_team_id(&mut *tx, &game.away_team, "game").await?;
        if home_team_id == away_team_id {
            return Err(ValidationError::Malformed {
                entity: "game",
                reason: format!("{} plays itself", game.home_team),
            }
            .into());
        }

        let existing = sqlx::query(&format!("{} WHERE g.external_id = ?", GAME_SELECT))
            .bind(external_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| Game::try_from(&row))
            .transpose()?;

        let outcome = match existing {
            None => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO games (external_id, season, week, home_team_id, away_team_id, scheduled_at,
                                       status, home_score, away_score, venue, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(external_id)
                .bind(game.season)
                .bind(game.week)
                .bind(home_team_id)
                .bind(away_team_id)
                .bind(game.scheduled_at.map(|dt| dt.to_rfc3339()))
                .bind(game.status.as_str())
                .bind(game.home_score)
                .bind(game.away_score)
                .bind(non_blank(&game.venue))
                .bind(&now)
                .bind(&now)
                .fetch_one(&mut *tx)
                .await?;
                UpsertOutcome::new(row.get("id"), UpsertAction::Inserted)
            }
            Some(current) if current.status.rank() > game.status.rank() => {
                tracing::debug!(
                    "Ignoring stale status for game {}: stored {}, incoming {}",
                    external_id,
                    current.status.as_str(),
                    game.status.as_str()
                );
                UpsertOutcome::new(current.id, UpsertAction::StaleIgnored)
            }
            Some(current) if current.absorbs(game, home_team_id, away_team_id) => {
                UpsertOutcome::new(current.id, UpsertAction::Unchanged)
            }
            Some(current) => {
                sqlx::query(
                    r#"
                    UPDATE games
                    SET season = ?,
                        week = ?,
                        home_team_id = ?,
                        away_team_id = ?,
                        scheduled_at = COALESCE(?, scheduled_at),
                        status = ?,
                        home_score = COALESCE(?, home_score),
                        away_score = COALESCE(?, away_score),
                        venue = COALESCE(?, venue),
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(game.season)
                .bind(game.week)
                .bind(home_team_id)
                .bind(away_team_id)
                .bind(game.scheduled_at.map(|dt| dt.to_rfc3339()))
                .bind(game.status.as_str())
                .bind(game.home_score)
                .bind(game.away_score)
                .bind(non_blank(&game.venue))
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

    /// Get a game by external id
    pub async fn get_game(&self, external_id: &str) -> Result<Option<Game>, DbError> {
        let result = sqlx::query(&format!("{} WHERE g.external_id = ?", GAME_SELECT))
            .bind(external_id.trim())
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| Game::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// List games with optional filters, in kickoff order
    pub async fn list_games(&self, query: GameQuery) -> Result<Vec<Game>, DbError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(season) = query.season {
            conditions.push("g.season = ?");
            params.push(season.to_string());
        }
        if let Some(week) = query.week {
            conditions.push("g.week = ?");
            params.push(week.to_string());
        }
        if let Some(status) = query.status {
            conditions.push("g.status = ?");
            params.push(status.as_str().to_string());
        }
        if let Some(team_id) = query.team_id {
            conditions.push("(g.home_team_id = ? OR g.away_team_id = ?)");
            params.push(team_id.to_string());
            params.push(team_id.to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "{} {} ORDER BY g.season, g.week, g.scheduled_at, g.external_id",
            GAME_SELECT, where_clause
        );
        let mut games_query = sqlx::query(&sql);
        for param in &params {
            games_query = games_query.bind(param);
        }

        let rows = games_query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| Game::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Number of stored games in the given status
    pub async fn count_games_with_status(&self, status: GameStatus) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// The (season, week) a slate should be built for
    ///
    /// The latest season with stored games and its [current week](Self::current_week).
    /// `None` when no games are stored.
    pub async fn current_period(&self) -> Result<Option<(i64, i64)>, DbError> {
        let Some(season) = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(season) FROM games")
            .fetch_one(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        Ok(self.current_week(season).await?.map(|week| (season, week)))
    }

    /// The earliest unfinished week of `season`, or its last week once
    /// everything is final. `None` when the season has no stored games.
    pub async fn current_week(&self, season: i64) -> Result<Option<i64>, DbError> {
        let unfinished: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(week) FROM games WHERE season = ? AND status != 'final'",
        )
        .bind(season)
        .fetch_one(&self.pool)
        .await?;
        if unfinished.is_some() {
            return Ok(unfinished);
        }

        let last: Option<i64> = sqlx::query_scalar("SELECT MAX(week) FROM games WHERE season = ?")
            .bind(season)
            .fetch_one(&self.pool)
            .await?;
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, TeamRef};
    use crate::repository::test_support::*;
    use proptest::prelude::*;

    fn game(external_id: &str, status: GameStatus) -> NewGame {
        NewGame {
            external_id: external_id.to_string(),
            season: 2025,
            week: 6,
            home_team: abbr("KC"),
            away_team: abbr("BUF"),
            scheduled_at: None,
            status,
            home_score: None,
            away_score: None,
            venue: None,
        }
    }

    async fn seeded() -> Database {
        let db = db().await;
        db.upsert_team(&team("Kansas City Chiefs", "KC")).await.unwrap();
        db.upsert_team(&team("Buffalo Bills", "BUF")).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_game_status_never_regresses() {
        let db = seeded().await;

        let final_game = NewGame {
            home_score: Some(27),
            away_score: Some(24),
            ..game("G1", GameStatus::Final)
        };
        let first = db.upsert_game(&final_game).await.unwrap();
        assert_eq!(first.action, UpsertAction::Inserted);

        let stale = NewGame {
            home_score: Some(0),
            away_score: Some(0),
            ..game("G1", GameStatus::InProgress)
        };
        let second = db.upsert_game(&stale).await.unwrap();
        assert_eq!(second, UpsertOutcome::new(first.id, UpsertAction::StaleIgnored));

        let stored = db.get_game("G1").await.unwrap().unwrap();
        assert_eq!(stored.status, GameStatus::Final);
        assert_eq!(stored.home_score, Some(27));
        assert_eq!(stored.away_score, Some(24));
    }

    #[tokio::test]
    async fn test_final_survives_late_scheduled_payload() {
        let db = seeded().await;

        for status in [GameStatus::Scheduled, GameStatus::Final, GameStatus::Scheduled] {
            db.upsert_game(&game("G1", status)).await.unwrap();
        }

        let stored = db.get_game("G1").await.unwrap().unwrap();
        assert_eq!(stored.status, GameStatus::Final);
        assert_eq!(db.count(EntityKind::Games).await.unwrap(), 1);
    }

    fn any_status() -> impl Strategy<Value = GameStatus> {
        prop_oneof![
            Just(GameStatus::Scheduled),
            Just(GameStatus::InProgress),
            Just(GameStatus::Final),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Whatever order payloads arrive in, the most advanced status seen is kept
        #[test]
        fn prop_stored_status_is_most_advanced_seen(
            statuses in prop::collection::vec(any_status(), 1..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (stored, actions) = runtime.block_on(async {
                let db = seeded().await;
                let mut actions = Vec::new();
                for status in &statuses {
                    actions.push(db.upsert_game(&game("G1", *status)).await.unwrap().action);
                }
                (db.get_game("G1").await.unwrap().unwrap(), actions)
            });

            let most_advanced = statuses.iter().map(GameStatus::rank).max().unwrap();
            prop_assert_eq!(stored.status.rank(), most_advanced);

            let mut seen = statuses[0].rank();
            for (status, action) in statuses.iter().zip(&actions).skip(1) {
                prop_assert_eq!(*action == UpsertAction::StaleIgnored, status.rank() < seen);
                seen = seen.max(status.rank());
            }
        }
    }

    #[tokio::test]
    async fn test_game_progresses_forward() {
        let db = seeded().await;
        db.upsert_game(&game("G2", GameStatus::Scheduled)).await.unwrap();

        let live = NewGame {
            home_score: Some(7),
            away_score: Some(3),
            ..game("G2", GameStatus::InProgress)
        };
        assert_eq!(
            db.upsert_game(&live).await.unwrap().action,
            UpsertAction::Updated
        );
        assert_eq!(
            db.upsert_game(&live).await.unwrap().action,
            UpsertAction::Unchanged
        );
        assert_eq!(
            db.count_games_with_status(GameStatus::InProgress).await.unwrap(),
            1
        );

        let stored = db.get_game("G2").await.unwrap().unwrap();
        assert_eq!(stored.home_team, "Kansas City Chiefs");
        assert_eq!(stored.away_team, "Buffalo Bills");
        assert_eq!(stored.home_score, Some(7));
    }

    #[tokio::test]
    async fn test_game_with_unknown_team_is_rejected() {
        let db = seeded().await;
        let orphan = NewGame {
            away_team: TeamRef::Name("Atlantis".to_string()),
            ..game("G3", GameStatus::Scheduled)
        };
        let err = db.upsert_game(&orphan).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(db.count(EntityKind::Games).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_game_against_itself_is_rejected() {
        let db = seeded().await;
        let mirror = NewGame {
            away_team: abbr("KC"),
            ..game("G4", GameStatus::Scheduled)
        };
        assert!(db.upsert_game(&mirror).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_list_games_and_current_period() {
        let db = seeded().await;
        assert_eq!(db.current_period().await.unwrap(), None);

        db.upsert_game(&NewGame {
            week: 5,
            ..game("W5", GameStatus::Final)
        })
        .await
        .unwrap();
        db.upsert_game(&game("W6", GameStatus::Scheduled)).await.unwrap();

        assert_eq!(db.current_period().await.unwrap(), Some((2025, 6)));

        let week_five = db
            .list_games(GameQuery {
                week: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(week_five.len(), 1);
        assert_eq!(week_five[0].external_id, "W5");

        let finals = db
            .list_games(GameQuery {
                status: Some(GameStatus::Final),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(finals.len(), 1);

        db.upsert_game(&game("W6", GameStatus::Final)).await.unwrap();
        assert_eq!(db.current_period().await.unwrap(), Some((2025, 6)));
    }

    #[tokio::test]
    async fn test_current_week_of_older_season() {
        let db = seeded().await;
        for (id, season, week, status) in [
            ("S24W17", 2024, 17, GameStatus::Final),
            ("S24W18", 2024, 18, GameStatus::Scheduled),
            ("S25W1", 2025, 1, GameStatus::Scheduled),
        ] {
            db.upsert_game(&NewGame {
                season,
                week,
                ..game(id, status)
            })
            .await
            .unwrap();
        }

        assert_eq!(db.current_week(2024).await.unwrap(), Some(18));
        assert_eq!(db.current_week(2023).await.unwrap(), None);
        assert_eq!(db.current_period().await.unwrap(), Some((2025, 1)));
    }
}
