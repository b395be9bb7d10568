//! Sync orchestrator
//!
//! A run walks the configured sources one after another: fetch through the
//! resilient fetch wrapper, normalize and validate every item, upsert the
//! valid records, invalidate the kind's cache tag, and finally write one
//! sync log entry per source as a single batch. Only one run may be active.

use chrono::{DateTime, Utc};
use gridiron_db::{
    Database, DbError, EntityKind, GameStatus, NewSyncLogEntry, UpsertAction,
};
use gridiron_upstream::UpstreamSource;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::breaker::{CircuitBreaker, SourceHealth};
use super::normalize::{CanonicalNormalizer, Envelope, Normalizer};
use crate::cache::CacheLayer;
use crate::clock::Clock;
use crate::error::{AlreadyRunning, BoxError};
use crate::fetch::{Backoff, FetchOptions, FetchOrigin, Fetched, ResilientFetcher};
use crate::live::LiveSignal;

const CIRCUIT_OPEN: &str = "circuit open";

/// An upstream source paired with the normalizer for its payload
#[derive(Clone)]
pub struct SyncSource {
    pub source: Arc<dyn UpstreamSource>,
    pub normalizer: Arc<dyn Normalizer>,
}

impl SyncSource {
    pub fn new(source: Arc<dyn UpstreamSource>, normalizer: Arc<dyn Normalizer>) -> Self {
        Self { source, normalizer }
    }

    /// Source using the canonical field mapping for `kind`
    pub fn canonical(source: Arc<dyn UpstreamSource>, kind: EntityKind) -> Self {
        Self::new(source, Arc::new(CanonicalNormalizer::new(kind)))
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn kind(&self) -> EntityKind {
        self.normalizer.kind()
    }
}

/// Sync orchestrator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Pause between two sources of the same run
    pub inter_source_delay: Duration,
    /// Total fetch attempts per source
    pub retries: u32,
    pub backoff_base: Duration,
    pub backoff: Backoff,
    /// Deadline for each fetch attempt
    pub timeout: Duration,
    /// Consecutive failures before a source is skipped; zero disables
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            inter_source_delay: Duration::from_secs(1),
            retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff: Backoff::Exponential,
            timeout: Duration::from_secs(10),
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl SyncConfig {
    fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            retries: self.retries,
            backoff_base: self.backoff_base,
            backoff: self.backoff,
            timeout: self.timeout,
            ..Default::default()
        }
    }
}

/// Where the active run currently is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "source", rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Fetching(String),
    Validating(String),
    Upserting(String),
    Logged,
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Scheduled,
    Manual,
}

/// Answer to a manual trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started { run_id: String },
    Rejected { reason: String },
}

/// Outcome of one source within a run
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub kind: EntityKind,
    pub success: bool,
    /// Records the store accepted, stale ones excluded
    pub rows_affected: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub stale_ignored: u64,
    /// Items rejected by normalization or store validation
    pub skipped: u64,
    pub fetch_attempts: u32,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SourceReport {
    fn new(source: &str, kind: EntityKind) -> Self {
        Self {
            source: source.to_string(),
            kind,
            success: false,
            rows_affected: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            stale_ignored: 0,
            skipped: 0,
            fetch_attempts: 0,
            error: None,
            duration_ms: 0,
        }
    }

    fn failed(mut self, error: impl Into<String>, started: Instant) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.finish(started)
    }

    fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }

    fn count(&mut self, action: UpsertAction) {
        if action != UpsertAction::StaleIgnored {
            self.rows_affected += 1;
        }
        match action {
            UpsertAction::Inserted => self.inserted += 1,
            UpsertAction::Updated => self.updated += 1,
            UpsertAction::Unchanged => self.unchanged += 1,
            UpsertAction::StaleIgnored => self.stale_ignored += 1,
        }
    }

    fn log_entry(&self, run_id: &str, at: DateTime<Utc>) -> NewSyncLogEntry {
        NewSyncLogEntry {
            run_id: run_id.to_string(),
            source: self.source.clone(),
            kind: self.kind.as_str().to_string(),
            rows_affected: self.rows_affected as i64,
            rows_skipped: self.skipped as i64,
            success: self.success,
            error_message: self.error.clone(),
            duration_ms: self.duration_ms as i64,
            created_at: at,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    /// Store error that stopped the run early
    pub aborted: Option<String>,
    pub log_written: bool,
    pub live: bool,
}

impl SyncReport {
    pub fn success(&self) -> bool {
        self.aborted.is_none() && self.sources.iter().all(|s| s.success)
    }

    pub fn rows_affected(&self) -> u64 {
        self.sources.iter().map(|s| s.rows_affected).sum()
    }
}

/// Snapshot for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub phase: SyncPhase,
    pub live: bool,
    pub last_report: Option<SyncReport>,
    pub sources: Vec<SourceHealth>,
}

struct RunState {
    running: watch::Sender<bool>,
    phase: Mutex<SyncPhase>,
    last_report: Mutex<Option<SyncReport>>,
}

/// Holds the run slot; releasing it returns the orchestrator to idle
struct RunGuard {
    state: Arc<RunState>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.state.phase.lock() = SyncPhase::Idle;
        self.state.running.send_replace(false);
    }
}

pub struct SyncOrchestrator {
    db: Database,
    cache: Arc<CacheLayer>,
    live: Arc<LiveSignal>,
    fetcher: ResilientFetcher,
    breaker: CircuitBreaker,
    sources: Vec<SyncSource>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    state: Arc<RunState>,
}

impl SyncOrchestrator {
    pub fn new(
        db: Database,
        cache: Arc<CacheLayer>,
        live: Arc<LiveSignal>,
        sources: Vec<SyncSource>,
        config: SyncConfig,
    ) -> Self {
        let clock = cache.clock().clone();
        let (running, _) = watch::channel(false);

        info!(
            "Initializing sync orchestrator with {} sources: {}",
            sources.len(),
            sources
                .iter()
                .map(|s| format!("{} ({})", s.name(), s.kind()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self {
            db,
            cache,
            live,
            fetcher: ResilientFetcher::new(),
            breaker: CircuitBreaker::new(config.failure_threshold, config.cooldown, clock.clone()),
            sources,
            config,
            clock,
            state: Arc::new(RunState {
                running,
                phase: Mutex::new(SyncPhase::Idle),
                last_report: Mutex::new(None),
            }),
        }
    }

    pub fn sources(&self) -> &[SyncSource] {
        &self.sources
    }

    pub fn is_running(&self) -> bool {
        *self.state.running.borrow()
    }

    pub fn phase(&self) -> SyncPhase {
        self.state.phase.lock().clone()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.state.last_report.lock().clone()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            running: self.is_running(),
            phase: self.phase(),
            live: self.live.is_live(),
            last_report: self.last_report(),
            sources: self.breaker.snapshot(),
        }
    }

    /// Restore per-source failure streaks from the sync log
    pub async fn seed_breaker_from_log(&self) -> Result<(), DbError> {
        for source in &self.sources {
            let (failures, last_failure) = self.db.consecutive_failures(source.name()).await?;
            self.breaker.seed(source.name(), failures, last_failure);
        }
        Ok(())
    }

    /// Run inline, unless another run holds the slot
    pub async fn run_once(&self, trigger: SyncTrigger) -> Result<SyncReport, AlreadyRunning> {
        let guard = self.try_begin().ok_or(AlreadyRunning)?;
        let run_id = Uuid::new_v4().to_string();
        Ok(self.execute(guard, run_id, trigger).await)
    }

    /// Start a run in the background without waiting for it
    pub fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        let Some(guard) = self.try_begin() else {
            info!("Manual sync rejected: {}", AlreadyRunning);
            return TriggerOutcome::Rejected {
                reason: "already_running".to_string(),
            };
        };

        let run_id = Uuid::new_v4().to_string();
        let orchestrator = self.clone();
        let id = run_id.clone();
        tokio::spawn(async move {
            orchestrator.execute(guard, id, SyncTrigger::Manual).await;
        });

        TriggerOutcome::Started { run_id }
    }

    /// Wait until no run holds the slot
    pub async fn wait_idle(&self) {
        let mut running = self.state.running.subscribe();
        // The sender lives as long as `self`
        let _ = running.wait_for(|running| !*running).await;
    }

    fn try_begin(&self) -> Option<RunGuard> {
        let claimed = self.state.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        claimed.then(|| RunGuard {
            state: self.state.clone(),
        })
    }

    fn set_phase(&self, phase: SyncPhase) {
        debug!("Sync phase: {:?}", phase);
        *self.state.phase.lock() = phase;
    }

    async fn execute(&self, guard: RunGuard, run_id: String, trigger: SyncTrigger) -> SyncReport {
        let started_at = self.clock.now();
        info!(run_id = %run_id, ?trigger, "Sync run started ({} sources)", self.sources.len());

        let mut reports = Vec::with_capacity(self.sources.len());
        let mut entries = Vec::with_capacity(self.sources.len());
        let mut aborted = None;

        for (index, source) in self.sources.iter().enumerate() {
            if index > 0 && !self.config.inter_source_delay.is_zero() {
                sleep(self.config.inter_source_delay).await;
            }

            let (report, fatal) = self.sync_source(&run_id, source).await;
            entries.push(report.log_entry(&run_id, self.clock.now()));
            reports.push(report);

            if let Some(fatal) = fatal {
                error!(
                    run_id = %run_id,
                    source = source.name(),
                    "Store error, skipping remaining sources: {}",
                    fatal
                );
                aborted = Some(fatal);
                break;
            }
        }

        self.set_phase(SyncPhase::Logged);
        let log_written = match self.db.insert_sync_log_batch(&entries).await {
            Ok(_) => true,
            Err(e) => {
                error!(run_id = %run_id, "Failed to write sync log: {}", e);
                false
            }
        };

        let live = match self.db.count_games_with_status(GameStatus::InProgress).await {
            Ok(in_progress) => {
                self.live.set(in_progress > 0);
                in_progress > 0
            }
            Err(e) => {
                warn!(run_id = %run_id, "Could not refresh live signal: {}", e);
                self.live.is_live()
            }
        };

        let report = SyncReport {
            run_id,
            trigger,
            started_at,
            finished_at: self.clock.now(),
            sources: reports,
            aborted,
            log_written,
            live,
        };

        let outcome = if report.success() { "success" } else { "failure" };
        metrics::counter!("gridiron_sync_runs_total", "outcome" => outcome).increment(1);
        info!(
            run_id = %report.run_id,
            "Sync run finished: {} ({} rows affected, live: {})",
            outcome,
            report.rows_affected(),
            report.live
        );

        *self.state.last_report.lock() = Some(report.clone());
        drop(guard);
        report
    }

    /// Sync one source; the second value is a store error that ends the run
    async fn sync_source(&self, run_id: &str, source: &SyncSource) -> (SourceReport, Option<String>) {
        let name = source.name();
        let kind = source.kind();
        let started = Instant::now();
        let mut report = SourceReport::new(name, kind);

        if !self.breaker.allow(name) {
            warn!(run_id, source = name, "Skipping source: {}", CIRCUIT_OPEN);
            return (report.failed(CIRCUIT_OPEN, started), None);
        }

        // Fetching
        self.set_phase(SyncPhase::Fetching(name.to_string()));
        let fetched = self
            .fetcher
            .call(
                name,
                || source.source.fetch(),
                || async { Ok::<_, BoxError>(Envelope::empty()) },
                &self.config.fetch_options(),
            )
            .await;

        let envelope = match fetched {
            Ok(Fetched {
                origin: FetchOrigin::Fallback { attempts, cause },
                ..
            }) => {
                // Keep existing data
                report.fetch_attempts = attempts;
                self.breaker.record_failure(name, &cause);
                warn!(run_id, source = name, "Fetch failed, keeping existing data: {}", cause);
                return (report.failed(cause, started), None);
            }
            Ok(Fetched { value, origin }) => {
                if let FetchOrigin::Upstream { attempts } = origin {
                    report.fetch_attempts = attempts;
                }
                value
            }
            Err(e) => {
                self.breaker.record_failure(name, &e.to_string());
                return (report.failed(e.to_string(), started), None);
            }
        };
        self.breaker.record_success(name);

        // Validating
        self.set_phase(SyncPhase::Validating(name.to_string()));
        let mut records = Vec::with_capacity(envelope.len());
        for (index, item) in envelope.into_items().iter().enumerate() {
            match source.normalizer.normalize(item) {
                Ok(record) => records.push(record),
                Err(e) => {
                    report.skipped += 1;
                    debug!(run_id, source = name, index, "Skipping invalid item: {}", e);
                }
            }
        }

        // Upserting
        self.set_phase(SyncPhase::Upserting(name.to_string()));
        let mut changed = false;
        let mut fatal = None;

        if kind == EntityKind::Injuries {
            match self.db.begin_injury_batch().await {
                Ok(retired) => {
                    debug!(run_id, source = name, "Retired {} active injuries", retired);
                    changed = retired > 0;
                }
                Err(e) => fatal = Some(e.to_string()),
            }
        }

        if fatal.is_none() {
            for record in &records {
                match self.db.upsert(record).await {
                    Ok(outcome) => {
                        report.count(outcome.action);
                        changed |= outcome.wrote();
                    }
                    Err(DbError::Validation(e)) => {
                        report.skipped += 1;
                        debug!(run_id, source = name, "Store rejected record: {}", e);
                    }
                    Err(e) => {
                        fatal = Some(e.to_string());
                        break;
                    }
                }
            }
        }

        if changed {
            let invalidated = self.cache.invalidate_tag(kind.as_str()).await;
            debug!(run_id, source = name, "Invalidated {} cached reads", invalidated);
        }

        metrics::counter!("gridiron_sync_rows_total", "source" => name.to_string())
            .increment(report.rows_affected);
        info!(
            run_id,
            source = name,
            "Synced {}: {} affected ({} inserted, {} updated, {} stale), {} skipped",
            kind,
            report.rows_affected,
            report.inserted,
            report.updated,
            report.stale_ignored,
            report.skipped
        );

        match fatal {
            Some(error) => (report.failed(error.clone(), started), Some(error)),
            None => {
                report.success = true;
                (report.finish(started), None)
            }
        }
    }
}
