//! Database repository implementation

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::DbError;
use crate::models::{EntityKind, Record, UpsertOutcome};

// Submodules
mod games;
mod injuries;
mod players;
mod sync_log;
mod teams;

pub use games::GameQuery;
pub use injuries::InjuryQuery;
pub use players::PlayerQuery;
pub use sync_log::SyncLogQuery;

/// Connection settings for the store
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub url: String,
    /// Upper bound on pooled connections; further acquires queue
    pub max_connections: u32,
    /// How long a queued acquire waits before giving up
    pub acquire_timeout: Duration,
}

impl DatabaseOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 8,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Database connection and operations
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        Self::connect(DatabaseOptions::new(database_url)).await
    }

    /// Create a pooled connection with explicit limits
    pub async fn connect(options: DatabaseOptions) -> Result<Self, DbError> {
        info!(
            "Connecting to database: {} (max connections: {})",
            options.url, options.max_connections
        );

        let connect_options = SqliteConnectOptions::from_str(&options.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect_options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Single-connection in-memory database
    ///
    /// The connection is never recycled, otherwise the schema would vanish with it.
    pub async fn in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Get the underlying pool for advanced usage
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Connectivity probe
    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Drain the pool; waits for checked-out connections to be returned
    pub async fn close(&self) {
        info!("Closing database pool");
        self.pool.close().await;
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Upsert any normalized record
    ///
    /// Validation happens before a transaction is opened, and each record
    /// commits on its own: a failing record never rolls back its siblings.
    pub async fn upsert(&self, record: &Record) -> Result<UpsertOutcome, DbError> {
        match record {
            Record::Team(team) => self.upsert_team(team).await,
            Record::Player(player) => self.upsert_player(player).await,
            Record::Game(game) => self.upsert_game(game).await,
            Record::Injury(injury) => self.upsert_injury(injury).await,
        }
    }

    /// Row count of an entity table (active rows only for injuries)
    pub async fn count(&self, kind: EntityKind) -> Result<i64, DbError> {
        let sql = match kind {
            EntityKind::Teams => "SELECT COUNT(*) FROM teams",
            EntityKind::Players => "SELECT COUNT(*) FROM players",
            EntityKind::Games => "SELECT COUNT(*) FROM games",
            EntityKind::Injuries => "SELECT COUNT(*) FROM injuries WHERE active = 1",
        };
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT,
                name TEXT NOT NULL,
                name_key TEXT NOT NULL UNIQUE,
                abbreviation TEXT,
                city TEXT,
                conference TEXT,
                division TEXT,
                primary_color TEXT,
                secondary_color TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_teams_external_id ON teams(external_id)",
            "CREATE INDEX IF NOT EXISTS idx_teams_abbreviation ON teams(abbreviation)",
            r#"
            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                natural_key TEXT NOT NULL UNIQUE,
                external_id TEXT,
                name TEXT NOT NULL,
                position TEXT,
                team_id INTEGER NOT NULL REFERENCES teams(id),
                jersey_number INTEGER,
                height TEXT,
                weight INTEGER,
                age INTEGER,
                experience_years INTEGER,
                college TEXT,
                status TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_players_team ON players(team_id)",
            r#"
            CREATE TABLE IF NOT EXISTS games (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                season INTEGER NOT NULL,
                week INTEGER NOT NULL,
                home_team_id INTEGER NOT NULL REFERENCES teams(id),
                away_team_id INTEGER NOT NULL REFERENCES teams(id),
                scheduled_at TEXT,
                status TEXT NOT NULL,
                home_score INTEGER,
                away_score INTEGER,
                venue TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_games_period ON games(season, week)",
            "CREATE INDEX IF NOT EXISTS idx_games_status ON games(status)",
            r#"
            CREATE TABLE IF NOT EXISTS injuries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id INTEGER NOT NULL REFERENCES players(id),
                status TEXT NOT NULL,
                description TEXT,
                reported_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            // One current injury per player; inactive history is unconstrained
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_injuries_active_player ON injuries(player_id) WHERE active = 1",
            r#"
            CREATE TABLE IF NOT EXISTS sync_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                source TEXT NOT NULL,
                kind TEXT NOT NULL,
                rows_affected INTEGER NOT NULL,
                rows_skipped INTEGER NOT NULL DEFAULT 0,
                success INTEGER NOT NULL,
                error_message TEXT,
                duration_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_sync_log_source ON sync_log(source, id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_log_created ON sync_log(created_at)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(e.to_string()))?;
        }

        info!("Database migrations completed");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_in_memory_migrations_and_ping() {
        let db = db().await;
        db.ping().await.unwrap();
        for kind in EntityKind::ALL {
            assert_eq!(db.count(kind).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("store.db").display());

        let db = Database::new(&url).await.unwrap();
        db.upsert(&Record::Team(team("Chicago Bears", "CHI")))
            .await
            .unwrap();
        db.close().await;
        assert!(db.is_closed());

        let reopened = Database::new(&url).await.unwrap();
        assert_eq!(reopened.count(EntityKind::Teams).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ping_fails_after_close() {
        let db = db().await;
        db.close().await;
        assert!(db.ping().await.is_err());
    }
}
