//! Configuration loading and management

use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use gridiron_core::{Backoff, EvictionPolicy, QueryConfig, SourceConfig, SyncConfig};
use gridiron_db::DatabaseOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub query: QuerySettings,
    /// Upstream sources, synced in this order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Sync log rows and retired injuries older than this are deleted daily
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            retention_days: default_retention_days(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,
    /// Directory for persistent entries; empty keeps them in memory only
    #[serde(default = "default_spill_path")]
    pub spill_path: Option<String>,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_live_bucket_minutes")]
    pub live_bucket_minutes: u64,
    /// Offset of the local calendar that periods are cut in
    #[serde(default)]
    pub utc_offset_hours: i32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            eviction_policy: default_eviction_policy(),
            spill_path: default_spill_path(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            live_bucket_minutes: default_live_bucket_minutes(),
            utc_offset_hours: 0,
        }
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
    #[serde(default = "default_inter_source_delay_ms")]
    pub inter_source_delay_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Consecutive failures before a source is skipped; 0 never skips
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_startup: true,
            inter_source_delay_ms: default_inter_source_delay_ms(),
            retries: default_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff: default_backoff(),
            timeout_secs: default_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Read cache lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    #[serde(default = "default_teams_ttl_secs")]
    pub teams_ttl_secs: u64,
    #[serde(default = "default_players_ttl_secs")]
    pub players_ttl_secs: u64,
    #[serde(default = "default_games_ttl_secs")]
    pub games_ttl_secs: u64,
    #[serde(default = "default_live_games_ttl_secs")]
    pub live_games_ttl_secs: u64,
    #[serde(default = "default_injuries_ttl_secs")]
    pub injuries_ttl_secs: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            teams_ttl_secs: default_teams_ttl_secs(),
            players_ttl_secs: default_players_ttl_secs(),
            games_ttl_secs: default_games_ttl_secs(),
            live_games_ttl_secs: default_live_games_ttl_secs(),
            injuries_ttl_secs: default_injuries_ttl_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "./data/gridiron.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_retention_days() -> i64 {
    30
}

fn default_max_entries() -> usize {
    10_000
}

fn default_eviction_policy() -> String {
    "lru".to_string()
}

fn default_spill_path() -> Option<String> {
    Some("./data/cache".to_string())
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_live_bucket_minutes() -> u64 {
    15
}

fn default_interval_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_inter_source_delay_ms() -> u64 {
    1000
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff() -> String {
    "exponential".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_teams_ttl_secs() -> u64 {
    3600
}

fn default_players_ttl_secs() -> u64 {
    1800
}

fn default_games_ttl_secs() -> u64 {
    300
}

fn default_live_games_ttl_secs() -> u64 {
    30
}

fn default_injuries_ttl_secs() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Clamp `value` into `[min, max]`, warning when it had to move
fn clamp_setting<T>(name: &str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if value < min {
        warn!("{} {} is below minimum {}, using minimum", name, value, min);
        min
    } else if value > max {
        warn!("{} {} exceeds maximum {}, using maximum", name, value, max);
        max
    } else {
        value
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        // Check if config file exists
        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default().validated());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.check_sources()?;

        info!("Loaded configuration from {}", path);
        Ok(config.validated())
    }

    /// Apply command line and environment overrides
    pub fn apply_overrides(&mut self, bind: Option<String>, port: Option<u16>) {
        if let Some(bind) = bind {
            self.server.bind_address = bind;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
    }

    /// Clamp out-of-range values
    pub fn validated(mut self) -> Self {
        let db = &mut self.database;
        db.max_connections = clamp_setting("database.max_connections", db.max_connections, 1, 64);
        db.acquire_timeout_secs = clamp_setting(
            "database.acquire_timeout_secs",
            db.acquire_timeout_secs,
            1,
            300,
        );
        db.retention_days = clamp_setting("database.retention_days", db.retention_days, 1, 3650);

        let cache = &mut self.cache;
        cache.max_entries = clamp_setting("cache.max_entries", cache.max_entries, 1, 1_000_000);
        cache.cleanup_interval_secs = clamp_setting(
            "cache.cleanup_interval_secs",
            cache.cleanup_interval_secs,
            1,
            86_400,
        );
        cache.live_bucket_minutes = clamp_setting(
            "cache.live_bucket_minutes",
            cache.live_bucket_minutes,
            1,
            1440,
        );
        cache.utc_offset_hours =
            clamp_setting("cache.utc_offset_hours", cache.utc_offset_hours, -12, 14);

        let sync = &mut self.sync;
        sync.interval_secs = clamp_setting("sync.interval_secs", sync.interval_secs, 10, 86_400);
        sync.retries = clamp_setting("sync.retries", sync.retries, 1, 10);
        sync.timeout_secs = clamp_setting("sync.timeout_secs", sync.timeout_secs, 1, 300);
        sync.backoff_base_ms =
            clamp_setting("sync.backoff_base_ms", sync.backoff_base_ms, 0, 60_000);
        sync.inter_source_delay_ms = clamp_setting(
            "sync.inter_source_delay_ms",
            sync.inter_source_delay_ms,
            0,
            60_000,
        );

        let query = &mut self.query;
        query.live_games_ttl_secs = clamp_setting(
            "query.live_games_ttl_secs",
            query.live_games_ttl_secs,
            1,
            query.games_ttl_secs.max(1),
        );

        self
    }

    /// Reject sources whose URL cannot be parsed
    fn check_sources(&self) -> Result<()> {
        for source in &self.sources {
            url::Url::parse(&source.url)
                .with_context(|| format!("Invalid URL for source '{}'", source.name))?;
        }
        Ok(())
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            url: format!("sqlite:{}?mode=rwc", self.database.path),
            max_connections: self.database.max_connections,
            acquire_timeout: Duration::from_secs(self.database.acquire_timeout_secs),
        }
    }

    pub fn cache_config(&self) -> gridiron_core::CacheConfig {
        let eviction_policy = self.cache.eviction_policy.parse::<EvictionPolicy>().unwrap_or_else(|e| {
            warn!("{}, using {}", e, EvictionPolicy::default().as_str());
            EvictionPolicy::default()
        });
        let utc_offset = FixedOffset::east_opt(self.cache.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());

        gridiron_core::CacheConfig {
            max_entries: self.cache.max_entries,
            eviction_policy,
            live_bucket: Duration::from_secs(self.cache.live_bucket_minutes * 60),
            utc_offset,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        let backoff = self.sync.backoff.parse::<Backoff>().unwrap_or_else(|e| {
            warn!("{}, using exponential backoff", e);
            Backoff::Exponential
        });

        SyncConfig {
            inter_source_delay: Duration::from_millis(self.sync.inter_source_delay_ms),
            retries: self.sync.retries,
            backoff_base: Duration::from_millis(self.sync.backoff_base_ms),
            backoff,
            timeout: Duration::from_secs(self.sync.timeout_secs),
            failure_threshold: self.sync.failure_threshold,
            cooldown: Duration::from_secs(self.sync.cooldown_secs),
        }
    }

    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            teams_ttl: Duration::from_secs(self.query.teams_ttl_secs),
            players_ttl: Duration::from_secs(self.query.players_ttl_secs),
            games_ttl: Duration::from_secs(self.query.games_ttl_secs),
            live_games_ttl: Duration::from_secs(self.query.live_games_ttl_secs),
            injuries_ttl: Duration::from_secs(self.query.injuries_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridiron_db::EntityKind;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/gridiron.toml").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sync.retries, 3);
        assert!(config.sources.is_empty());
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_sources_and_sections() {
        let file = write_config(
            r#"
[server]
port = 9000

[sync]
interval_secs = 120
backoff = "linear"

[[sources]]
name = "teams"
kind = "teams"
url = "https://api.example.com/teams"

[[sources]]
name = "injuries"
kind = "injuries"
url = "https://api.example.com/injuries"
api_key = "secret"
enabled = false
"#,
        );

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].kind, EntityKind::Injuries);
        assert!(!config.sources[1].enabled);

        let sync = config.sync_config();
        assert_eq!(sync.backoff, Backoff::Linear);
        assert_eq!(sync.retries, 3);
    }

    #[test]
    fn test_invalid_source_url_is_rejected() {
        let file = write_config(
            r#"
[[sources]]
name = "games"
kind = "games"
url = "not a url"
"#,
        );
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let file = write_config(
            r#"
[cache]
max_entries = 0
utc_offset_hours = 30
eviction_policy = "random"

[sync]
retries = 0
interval_secs = 1

[query]
games_ttl_secs = 60
live_games_ttl_secs = 600
"#,
        );

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.cache.max_entries, 1);
        assert_eq!(config.cache.utc_offset_hours, 14);
        assert_eq!(config.sync.retries, 1);
        assert_eq!(config.sync.interval_secs, 10);
        assert_eq!(config.query.live_games_ttl_secs, 60);

        let cache = config.cache_config();
        assert_eq!(cache.eviction_policy, EvictionPolicy::Lru);
        assert_eq!(cache.utc_offset.local_minus_utc(), 14 * 3600);
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(Some("127.0.0.1".to_string()), None);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.port, 8080);

        config.apply_overrides(None, Some(3000));
        assert_eq!(config.server.port, 3000);
        assert_eq!(
            config.database_options().url,
            "sqlite:./data/gridiron.db?mode=rwc"
        );
    }
}
