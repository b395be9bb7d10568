//! Injury operations
//!
//! At most one active injury exists per player. A sync run opens a batch,
//! which retires every active row; records from the run then reactivate or
//! replace them, so players missing from the latest report drop off.

use chrono::Utc;
use sqlx::Row;

use crate::error::DbError;
use crate::models::{Injury, InjuryStatus, NewInjury, UpsertAction, UpsertOutcome};
use crate::repository::Database;
use crate::repository::players::require_player_id;
use crate::utils::{non_blank, parse_optional_datetime};

const INJURY_SELECT: &str = r#"
    SELECT i.id, i.player_id, p.name AS player_name, p.team_id, t.name AS team_name,
           i.status, i.description, i.reported_at, i.active, i.created_at
    FROM injuries i
    JOIN players p ON p.id = i.player_id
    JOIN teams t ON t.id = p.team_id
"#;

/// Query parameters for listing injuries
#[derive(Debug, Clone, Default)]
pub struct InjuryQuery {
    pub team_id: Option<i64>,
    pub status: Option<InjuryStatus>,
    /// Include rows retired by later batches
    pub include_inactive: bool,
}

impl Database {
    // ==================== Injury Operations ====================

    /// Retire all active injuries ahead of a fresh report
    ///
    /// Returns the number of rows retired.
    pub async fn begin_injury_batch(&self) -> Result<u64, DbError> {
        let result = sqlx::query("UPDATE injuries SET active = 0, updated_at = ? WHERE active = 1")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Upsert the current injury for a player
    pub async fn upsert_injury(&self, injury: &NewInjury) -> Result<UpsertOutcome, DbError> {
        injury.validate()?;
        let now = Utc::now().to_rfc3339();
        let reported_at = injury
            .reported_at
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| now.clone());
        let description = non_blank(&injury.description);

        let mut tx = self.pool.begin().await?;

        let player_id = require_player_id(&mut *tx, &injury.player, "injury").await?;

        // Latest row for the player, active first
        let latest = sqlx::query(
            r#"
            SELECT id, status, description, reported_at, active
            FROM injuries
            WHERE player_id = ?
            ORDER BY active DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(player_id)
        .fetch_optional(&mut *tx)
        .await?;

        let same = |row: &sqlx::sqlite::SqliteRow| -> Result<bool, sqlx::Error> {
            let status: String = row.try_get("status")?;
            let stored_description: Option<String> = row.try_get("description")?;
            let stored_reported: Option<String> = row.try_get("reported_at")?;
            Ok(status == injury.status.as_str()
                && stored_description.as_deref() == description
                && (injury.reported_at.is_none()
                    || parse_optional_datetime(stored_reported) == injury.reported_at))
        };

        let outcome = match latest {
            Some(row) if same(&row)? => {
                let id: i64 = row.try_get("id")?;
                let active: bool = row.try_get("active")?;
                if !active {
                    sqlx::query("UPDATE injuries SET active = 1, updated_at = ? WHERE id = ?")
                        .bind(&now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                UpsertOutcome::new(id, UpsertAction::Unchanged)
            }
            Some(row) if row.try_get::<bool, _>("active")? => {
                let id: i64 = row.try_get("id")?;
                sqlx::query(
                    r#"
                    UPDATE injuries
                    SET status = ?, description = ?, reported_at = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(injury.status.as_str())
                .bind(description)
                .bind(&reported_at)
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::new(id, UpsertAction::Updated)
            }
            _ => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO injuries (player_id, status, description, reported_at, active, created_at, updated_at)
                    VALUES (?, ?, ?, ?, 1, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(player_id)
                .bind(injury.status.as_str())
                .bind(description)
                .bind(&reported_at)
                .bind(&now)
                .bind(&now)
                .fetch_one(&mut *tx)
                .await?;
                UpsertOutcome::new(row.get("id"), UpsertAction::Inserted)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// List injuries, most recently reported first
    pub async fn list_injuries(&self, query: InjuryQuery) -> Result<Vec<Injury>, DbError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if !query.include_inactive {
            conditions.push("i.active = 1");
        }
        if let Some(team_id) = query.team_id {
            conditions.push("p.team_id = ?");
            params.push(team_id.to_string());
        }
        if let Some(status) = query.status {
            conditions.push("i.status = ?");
            params.push(status.as_str().to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "{} {} ORDER BY i.reported_at DESC, i.id DESC",
            INJURY_SELECT, where_clause
        );
        let mut injuries_query = sqlx::query(&sql);
        for param in &params {
            injuries_query = injuries_query.bind(param);
        }

        let rows = injuries_query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| Injury::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Active injury count per team id, excluding players listed healthy
    pub async fn injury_counts_by_team(&self) -> Result<Vec<(i64, i64)>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT p.team_id AS team_id, COUNT(*) AS count
            FROM injuries i
            JOIN players p ON p.id = i.player_id
            WHERE i.active = 1 AND i.status != 'healthy'
            GROUP BY p.team_id
            ORDER BY p.team_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("team_id"), row.get("count")))
            .collect())
    }

    /// Delete retired injuries older than `days`
    pub async fn prune_inactive_injuries(&self, days: i64) -> Result<u64, DbError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let result = sqlx::query("DELETE FROM injuries WHERE active = 0 AND updated_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::models::{EntityKind, NewPlayer, PlayerRef};
    use crate::repository::test_support::*;

    fn report(name: &str, status: InjuryStatus) -> NewInjury {
        NewInjury {
            player: PlayerRef::NameOnTeam {
                name: name.to_string(),
                team: abbr("KC"),
            },
            status,
            description: Some("Ankle".to_string()),
            reported_at: None,
        }
    }

    async fn seeded() -> Database {
        let db = db().await;
        db.upsert_team(&team("Kansas City Chiefs", "KC")).await.unwrap();
        for name in ["Patrick Mahomes", "Travis Kelce", "Isiah Pacheco"] {
            db.upsert_player(&NewPlayer::new(name, abbr("KC")))
                .await
                .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_batch_replaces_previous_report() {
        let db = seeded().await;

        db.begin_injury_batch().await.unwrap();
        db.upsert_injury(&report("Travis Kelce", InjuryStatus::Questionable))
            .await
            .unwrap();
        db.upsert_injury(&report("Isiah Pacheco", InjuryStatus::Out))
            .await
            .unwrap();
        assert_eq!(db.count(EntityKind::Injuries).await.unwrap(), 2);

        // Next report only lists Pacheco
        assert_eq!(db.begin_injury_batch().await.unwrap(), 2);
        let outcome = db
            .upsert_injury(&report("Isiah Pacheco", InjuryStatus::Out))
            .await
            .unwrap();
        assert_eq!(outcome.action, UpsertAction::Unchanged);

        let active = db.list_injuries(InjuryQuery::default()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].player_name, "Isiah Pacheco");
        assert_eq!(active[0].team_name, "Kansas City Chiefs");

        let all = db
            .list_injuries(InjuryQuery {
                include_inactive: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_one_active_injury_per_player() {
        let db = seeded().await;

        let first = db
            .upsert_injury(&report("Patrick Mahomes", InjuryStatus::Questionable))
            .await
            .unwrap();
        let second = db
            .upsert_injury(&report("Patrick Mahomes", InjuryStatus::Doubtful))
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome::new(first.id, UpsertAction::Updated));
        assert_eq!(db.count(EntityKind::Injuries).await.unwrap(), 1);

        let stored = db.list_injuries(InjuryQuery::default()).await.unwrap();
        assert_eq!(stored[0].status, InjuryStatus::Doubtful);
    }

    #[tokio::test]
    async fn test_changed_status_after_batch_inserts_new_row() {
        let db = seeded().await;
        db.upsert_injury(&report("Travis Kelce", InjuryStatus::Questionable))
            .await
            .unwrap();

        db.begin_injury_batch().await.unwrap();
        let outcome = db
            .upsert_injury(&report("Travis Kelce", InjuryStatus::Out))
            .await
            .unwrap();
        assert_eq!(outcome.action, UpsertAction::Inserted);
        assert_eq!(db.count(EntityKind::Injuries).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injury_for_unknown_player_is_rejected() {
        let db = seeded().await;
        let err = db
            .upsert_injury(&report("Nobody Atall", InjuryStatus::Out))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Validation(ValidationError::UnresolvedReference { entity: "injury", .. })
        ));
    }

    #[tokio::test]
    async fn test_injury_counts_by_team() {
        let db = seeded().await;
        db.upsert_injury(&report("Travis Kelce", InjuryStatus::Out))
            .await
            .unwrap();
        db.upsert_injury(&report("Patrick Mahomes", InjuryStatus::Healthy))
            .await
            .unwrap();

        let counts = db.injury_counts_by_team().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].1, 1);
    }

    #[tokio::test]
    async fn test_prune_keeps_recent_history() {
        let db = seeded().await;
        db.upsert_injury(&report("Travis Kelce", InjuryStatus::Out))
            .await
            .unwrap();
        db.begin_injury_batch().await.unwrap();

        assert_eq!(db.prune_inactive_injuries(30).await.unwrap(), 0);
        assert_eq!(db.prune_inactive_injuries(-1).await.unwrap(), 1);
    }
}
