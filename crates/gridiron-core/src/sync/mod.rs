//! Background synchronization of upstream sources into the store

mod breaker;
mod normalize;
mod orchestrator;
mod scheduler;

pub use breaker::{CircuitBreaker, CircuitState, SourceHealth};
pub use normalize::{CanonicalNormalizer, Envelope, Normalizer};
pub use orchestrator::{
    SourceReport, SyncConfig, SyncOrchestrator, SyncPhase, SyncReport, SyncSource, SyncStatus,
    SyncTrigger, TriggerOutcome,
};
pub use scheduler::SyncScheduler;
