//! Sync log operations

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::DbError;
use crate::models::{NewSyncLogEntry, SyncLogEntry};
use crate::repository::Database;
use crate::utils::parse_optional_datetime;

const SYNC_LOG_COLUMNS: &str = "id, run_id, source, kind, rows_affected, rows_skipped, success, \
                                error_message, duration_ms, created_at";

/// Query parameters for listing sync log entries
#[derive(Debug, Clone)]
pub struct SyncLogQuery {
    /// Filter by source name
    pub source: Option<String>,
    /// Filter by run id
    pub run_id: Option<String>,
    /// Filter by outcome
    pub success: Option<bool>,
    /// Pagination offset
    pub offset: i64,
    /// Pagination limit
    pub limit: i64,
}

impl Default for SyncLogQuery {
    fn default() -> Self {
        Self {
            source: None,
            run_id: None,
            success: None,
            offset: 0,
            limit: 50,
        }
    }
}

impl SyncLogQuery {
    pub fn validated(mut self) -> Self {
        self.offset = self.offset.max(0);
        self.limit = self.limit.clamp(1, 500);
        self
    }
}

impl Database {
    // ==================== Sync Log Operations ====================

    /// Write every entry of a run in a single transaction
    pub async fn insert_sync_log_batch(&self, entries: &[NewSyncLogEntry]) -> Result<u64, DbError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO sync_log (run_id, source, kind, rows_affected, rows_skipped, success,
                                      error_message, duration_ms, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.run_id)
            .bind(&entry.source)
            .bind(&entry.kind)
            .bind(entry.rows_affected)
            .bind(entry.rows_skipped)
            .bind(entry.success)
            .bind(&entry.error_message)
            .bind(entry.duration_ms)
            .bind(entry.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(entries.len() as u64)
    }

    /// List sync log entries, newest first, with the total matching count
    pub async fn list_sync_log(
        &self,
        query: SyncLogQuery,
    ) -> Result<(Vec<SyncLogEntry>, i64), DbError> {
        let query = query.validated();
        let mut conditions = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(source) = &query.source {
            conditions.push("source = ?");
            params.push(source.clone());
        }
        if let Some(run_id) = &query.run_id {
            conditions.push("run_id = ?");
            params.push(run_id.clone());
        }
        if let Some(success) = query.success {
            conditions.push("success = ?");
            params.push(if success { "1" } else { "0" }.to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Get total count
        let count_sql = format!("SELECT COUNT(*) as count FROM sync_log {}", where_clause);
        let mut count_query = sqlx::query(&count_sql);
        for param in &params {
            count_query = count_query.bind(param);
        }
        let count_row = count_query.fetch_one(&self.pool).await?;
        let total: i64 = count_row.get("count");

        let sql = format!(
            "SELECT {} FROM sync_log {} ORDER BY id DESC LIMIT ? OFFSET ?",
            SYNC_LOG_COLUMNS, where_clause
        );
        let mut entries_query = sqlx::query(&sql);
        for param in &params {
            entries_query = entries_query.bind(param);
        }
        entries_query = entries_query.bind(query.limit).bind(query.offset);

        let rows = entries_query.fetch_all(&self.pool).await?;
        let entries: Result<Vec<SyncLogEntry>, _> = rows
            .iter()
            .map(|row| SyncLogEntry::try_from(row).map_err(DbError::from))
            .collect();

        Ok((entries?, total))
    }

    /// Failures logged for `source` since its last success, and when the latest one happened
    pub async fn consecutive_failures(
        &self,
        source: &str,
    ) -> Result<(u32, Option<DateTime<Utc>>), DbError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS failures, MAX(created_at) AS last_failure
            FROM sync_log
            WHERE source = ?
              AND success = 0
              AND id > COALESCE((SELECT MAX(id) FROM sync_log WHERE source = ? AND success = 1), 0)
            "#,
        )
        .bind(source)
        .bind(source)
        .fetch_one(&self.pool)
        .await?;

        let failures: i64 = row.get("failures");
        let last_failure: Option<String> = row.get("last_failure");
        Ok((
            u32::try_from(failures).unwrap_or(u32::MAX),
            parse_optional_datetime(last_failure),
        ))
    }

    /// Most recent entry, optionally for one source
    pub async fn last_sync(&self, source: Option<&str>) -> Result<Option<SyncLogEntry>, DbError> {
        let row = match source {
            Some(source) => {
                sqlx::query(&format!(
                    "SELECT {} FROM sync_log WHERE source = ? ORDER BY id DESC LIMIT 1",
                    SYNC_LOG_COLUMNS
                ))
                .bind(source)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM sync_log ORDER BY id DESC LIMIT 1",
                    SYNC_LOG_COLUMNS
                ))
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(|row| SyncLogEntry::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Clean up old sync log entries (keep last N days)
    pub async fn cleanup_old_sync_log(&self, days: i64) -> Result<u64, DbError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let result = sqlx::query("DELETE FROM sync_log WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::*;

    fn entry(run_id: &str, source: &str, success: bool) -> NewSyncLogEntry {
        NewSyncLogEntry {
            run_id: run_id.to_string(),
            source: source.to_string(),
            kind: "games".to_string(),
            rows_affected: if success { 16 } else { 0 },
            rows_skipped: 0,
            success,
            error_message: (!success).then(|| "upstream timed out".to_string()),
            duration_ms: 120,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_batch_insert_and_list() {
        let db = db().await;
        let written = db
            .insert_sync_log_batch(&[
                entry("run-1", "teams", true),
                entry("run-1", "games", true),
                entry("run-1", "injuries", false),
            ])
            .await
            .unwrap();
        assert_eq!(written, 3);

        let (entries, total) = db.list_sync_log(SyncLogQuery::default()).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(entries[0].source, "injuries");
        assert_eq!(entries[0].error_message.as_deref(), Some("upstream timed out"));

        let (failed, total) = db
            .list_sync_log(SyncLogQuery {
                success: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert!(!failed[0].success);

        let (page, total) = db
            .list_sync_log(SyncLogQuery {
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].source, "games");
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let db = db().await;
        assert_eq!(db.insert_sync_log_batch(&[]).await.unwrap(), 0);
        assert!(db.last_sync(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consecutive_failures_reset_on_success() {
        let db = db().await;
        assert_eq!(db.consecutive_failures("games").await.unwrap(), (0, None));

        db.insert_sync_log_batch(&[entry("r1", "games", false)])
            .await
            .unwrap();
        db.insert_sync_log_batch(&[entry("r2", "games", false)])
            .await
            .unwrap();
        let (failures, last) = db.consecutive_failures("games").await.unwrap();
        assert_eq!(failures, 2);
        assert!(last.is_some());

        db.insert_sync_log_batch(&[entry("r3", "games", true)])
            .await
            .unwrap();
        assert_eq!(db.consecutive_failures("games").await.unwrap().0, 0);

        db.insert_sync_log_batch(&[entry("r4", "games", false), entry("r4", "teams", false)])
            .await
            .unwrap();
        assert_eq!(db.consecutive_failures("games").await.unwrap().0, 1);
        assert_eq!(db.consecutive_failures("teams").await.unwrap().0, 1);
    }

    #[tokio::test]
    async fn test_last_sync_by_source() {
        let db = db().await;
        db.insert_sync_log_batch(&[entry("r1", "teams", true), entry("r1", "games", true)])
            .await
            .unwrap();

        assert_eq!(db.last_sync(None).await.unwrap().unwrap().source, "games");
        assert_eq!(
            db.last_sync(Some("teams")).await.unwrap().unwrap().run_id,
            "r1"
        );
        assert!(db.last_sync(Some("odds")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_old_sync_log() {
        let db = db().await;
        let mut old = entry("r0", "teams", true);
        old.created_at = Utc::now() - chrono::Duration::days(90);
        db.insert_sync_log_batch(&[old, entry("r1", "teams", true)])
            .await
            .unwrap();

        assert_eq!(db.cleanup_old_sync_log(30).await.unwrap(), 1);
        let (_, total) = db.list_sync_log(SyncLogQuery::default()).await.unwrap();
        assert_eq!(total, 1);
    }
}
