//! Periodic sync scheduling

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::orchestrator::{SyncOrchestrator, SyncTrigger};

/// Fires a sync run every `interval`
///
/// Ticks that find a run already active are skipped. Stopping cancels the
/// timer and waits for a scheduled run in flight; a run is never interrupted
/// mid-upsert.
pub struct SyncScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn start(
        orchestrator: Arc<SyncOrchestrator>,
        every: Duration,
        run_on_startup: bool,
    ) -> Self {
        let every = every.max(Duration::from_secs(1));
        let (shutdown, mut stop) = watch::channel(false);

        info!(
            "Starting sync scheduler (interval: {:?}, run on startup: {})",
            every, run_on_startup
        );

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // The first tick fires immediately
            ticker.tick().await;
            if run_on_startup {
                Self::run(&orchestrator, SyncTrigger::Startup).await;
            }

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run(&orchestrator, SyncTrigger::Scheduled).await;
                    }
                    _ = stop.changed() => {
                        debug!("Sync scheduler received shutdown");
                        break;
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    async fn run(orchestrator: &SyncOrchestrator, trigger: SyncTrigger) {
        if let Err(e) = orchestrator.run_once(trigger).await {
            debug!("Skipping {:?} sync: {}", trigger, e);
        }
    }

    /// Stop the timer and wait for the current scheduled run to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Sync scheduler task ended abnormally: {}", e);
        }
        info!("Sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheLayer};
    use crate::live::LiveSignal;
    use crate::sync::SyncSource;
    use crate::sync::orchestrator::SyncConfig;
    use gridiron_db::{Database, EntityKind};
    use gridiron_upstream::FnSource;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn orchestrator(calls: Arc<AtomicUsize>, delay: Duration) -> Arc<SyncOrchestrator> {
        let source = FnSource::new("teams", move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(json!([{"name": "Green Bay Packers", "abbr": "GB"}]))
            })
        });
        Arc::new(SyncOrchestrator::new(
            Database::in_memory().await.unwrap(),
            Arc::new(CacheLayer::new(CacheConfig::default())),
            Arc::new(LiveSignal::default()),
            vec![SyncSource::canonical(Arc::new(source), EntityKind::Teams)],
            SyncConfig {
                inter_source_delay: Duration::ZERO,
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_runs_on_startup_and_stops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = orchestrator(calls.clone(), Duration::ZERO).await;

        let scheduler = SyncScheduler::start(orchestrator.clone(), Duration::from_secs(3600), true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.last_report().unwrap().success());
    }

    #[tokio::test]
    async fn test_stop_waits_for_run_in_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = orchestrator(calls.clone(), Duration::from_millis(200)).await;

        let scheduler = SyncScheduler::start(orchestrator.clone(), Duration::from_secs(3600), true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orchestrator.is_running());

        scheduler.stop().await;
        assert!(!orchestrator.is_running());
        assert!(orchestrator.last_report().is_some());
    }

    #[tokio::test]
    async fn test_no_startup_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = orchestrator(calls.clone(), Duration::ZERO).await;

        let scheduler = SyncScheduler::start(orchestrator.clone(), Duration::from_secs(3600), false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
