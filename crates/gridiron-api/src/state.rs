//! Application state

use gridiron_core::{CacheLayer, QueryService, SyncOrchestrator};
use gridiron_db::Database;
use std::sync::Arc;

/// Handle used to render the Prometheus exposition
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub cache: Arc<CacheLayer>,
    pub query: Arc<QueryService>,
    pub sync: Arc<SyncOrchestrator>,
}

impl AppState {
    pub fn new(
        db: Database,
        cache: Arc<CacheLayer>,
        query: Arc<QueryService>,
        sync: Arc<SyncOrchestrator>,
    ) -> Self {
        Self {
            db,
            cache,
            query,
            sync,
        }
    }
}
