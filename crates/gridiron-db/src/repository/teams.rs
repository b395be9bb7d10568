//! Team operations

use chrono::Utc;
use sqlx::{Row, SqliteConnection};

use crate::error::{DbError, ValidationError};
use crate::models::{NewTeam, Team, TeamRef, UpsertAction, UpsertOutcome};
use crate::repository::Database;
use crate::utils::{non_blank, normalize_name};

const TEAM_COLUMNS: &str = "id, external_id, name, abbreviation, city, conference, division, \
                            primary_color, secondary_color, created_at, updated_at";

/// Resolve a team reference to a row id inside an open transaction
///
/// Names match the normalized team name first, then the abbreviation.
pub(crate) async fn resolve_team_id(
    conn: &mut SqliteConnection,
    team: &TeamRef,
) -> Result<Option<i64>, DbError> {
    let id = match team {
        TeamRef::Id(id) => {
            sqlx::query_scalar::<_, i64>("SELECT id FROM teams WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
        }
        TeamRef::ExternalId(ext) => {
            sqlx::query_scalar::<_, i64>("SELECT id FROM teams WHERE external_id = ? LIMIT 1")
                .bind(ext.trim())
                .fetch_optional(&mut *conn)
                .await?
        }
        TeamRef::Name(name) => {
            let by_name = sqlx::query_scalar::<_, i64>("SELECT id FROM teams WHERE name_key = ?")
                .bind(normalize_name(name))
                .fetch_optional(&mut *conn)
                .await?;
            match by_name {
                Some(id) => Some(id),
                None => {
                    sqlx::query_scalar::<_, i64>(
                        "SELECT id FROM teams WHERE upper(abbreviation) = upper(?) LIMIT 1",
                    )
                    .bind(name.trim())
                    .fetch_optional(&mut *conn)
                    .await?
                }
            }
        }
    };
    Ok(id)
}

/// Resolve or reject with a validation error
pub(crate) async fn require_team_id(
    conn: &mut SqliteConnection,
    team: &TeamRef,
    entity: &'static str,
) -> Result<i64, DbError> {
    resolve_team_id(conn, team).await?.ok_or_else(|| {
        DbError::Validation(ValidationError::UnresolvedReference {
            entity,
            reference: team.to_string(),
        })
    })
}

/// Incoming optional fields only overwrite when present
fn merged<'a>(incoming: &'a Option<String>, current: &'a Option<String>) -> Option<&'a str> {
    non_blank(incoming).or(current.as_deref())
}

impl Team {
    /// Whether applying `update` would leave this row as it is
    fn absorbs(&self, update: &NewTeam) -> bool {
        self.name == update.name.trim()
            && merged(&update.external_id, &self.external_id) == self.external_id.as_deref()
            && merged(&update.abbreviation, &self.abbreviation) == self.abbreviation.as_deref()
            && merged(&update.city, &self.city) == self.city.as_deref()
            && merged(&update.conference, &self.conference) == self.conference.as_deref()
            && merged(&update.division, &self.division) == self.division.as_deref()
            && merged(&update.primary_color, &self.primary_color) == self.primary_color.as_deref()
            && merged(&update.secondary_color, &self.secondary_color)
                == self.secondary_color.as_deref()
    }
}

impl Database {
    // ==================== Team Operations ====================

    /// Insert or update a team keyed by its normalized name
    pub async fn upsert_team(&self, team: &NewTeam) -> Result<UpsertOutcome, DbError> {
        team.validate()?;
        let name_key = normalize_name(&team.name);
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {} FROM teams WHERE name_key = ?",
            TEAM_COLUMNS
        ))
        .bind(&name_key)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| Team::try_from(&row))
        .transpose()?;

        let outcome = match existing {
            None => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO teams (external_id, name, name_key, abbreviation, city, conference, division,
                                       primary_color, secondary_color, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(non_blank(&team.external_id))
                .bind(team.name.trim())
                .bind(&name_key)
                .bind(non_blank(&team.abbreviation))
                .bind(non_blank(&team.city))
                .bind(non_blank(&team.conference))
                .bind(non_blank(&team.division))
                .bind(non_blank(&team.primary_color))
                .bind(non_blank(&team.secondary_color))
                .bind(&now)
                .bind(&now)
                .fetch_one(&mut *tx)
                .await?;
                UpsertOutcome::new(row.get("id"), UpsertAction::Inserted)
            }
            Some(current) if current.absorbs(team) => {
                UpsertOutcome::new(current.id, UpsertAction::Unchanged)
            }
            Some(current) => {
                sqlx::query(
                    r#"
                    UPDATE teams
                    SET external_id = COALESCE(?, external_id),
                        name = ?,
                        abbreviation = COALESCE(?, abbreviation),
                        city = COALESCE(?, city),
                        conference = COALESCE(?, conference),
                        division = COALESCE(?, division),
                        primary_color = COALESCE(?, primary_color),
                        secondary_color = COALESCE(?, secondary_color),
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(non_blank(&team.external_id))
                .bind(team.name.trim())
                .bind(non_blank(&team.abbreviation))
                .bind(non_blank(&team.city))
                .bind(non_blank(&team.conference))
                .bind(non_blank(&team.division))
                .bind(non_blank(&team.primary_color))
                .bind(non_blank(&team.secondary_color))
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

    /// List all teams ordered by name
    pub async fn list_teams(&self) -> Result<Vec<Team>, DbError> {
        let rows = sqlx::query(&format!("SELECT {} FROM teams ORDER BY name", TEAM_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Team::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Get a team by row id
    pub async fn get_team(&self, id: i64) -> Result<Option<Team>, DbError> {
        let result = sqlx::query(&format!("SELECT {} FROM teams WHERE id = ?", TEAM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| Team::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Find a team by row id, abbreviation, or name
    pub async fn find_team(&self, needle: &str) -> Result<Option<Team>, DbError> {
        let mut conn = self.pool.acquire().await?;
        let reference = match needle.trim().parse::<i64>() {
            Ok(id) => TeamRef::Id(id),
            Err(_) => TeamRef::Name(needle.to_string()),
        };
        let Some(id) = resolve_team_id(&mut conn, &reference).await? else {
            return Ok(None);
        };
        drop(conn);
        self.get_team(id).await
    }
}
