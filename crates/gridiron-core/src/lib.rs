//! Gridiron Core Business Logic
//!
//! This crate provides the data freshness and resilience core: the cache
//! layer, the resilient fetch wrapper, the sync orchestrator and the query
//! service that serves every read.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod live;
pub mod query;
pub mod sync;

pub use cache::{
    CacheConfig, CacheLayer, CacheStats, CachedValue, EvictionPolicy, Lookup, LookupOutcome,
    PeriodCalendar, PeriodKey, PutOptions, spawn_cleanup_task,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SourceConfig, build_sources};
pub use error::{AlreadyRunning, AttemptError, BoxError, CoreError, FetchError};
pub use fetch::{Backoff, FetchOptions, FetchOrigin, Fetched, ResilientFetcher};
pub use live::LiveSignal;
pub use query::{
    Freshness, GameFilter, InjuryFilter, PlayerFilter, QueryConfig, QueryResponse, QueryService,
    ServedFrom, SlateRequest,
};
pub use sync::{
    CanonicalNormalizer, Envelope, Normalizer, SourceReport, SyncConfig, SyncOrchestrator,
    SyncPhase, SyncReport, SyncScheduler, SyncSource, SyncStatus, SyncTrigger, TriggerOutcome,
};
