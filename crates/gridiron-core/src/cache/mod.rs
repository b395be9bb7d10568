//! Cache layer module

mod manager;
mod period;
mod policy;

pub use manager::{
    CacheConfig, CacheLayer, CacheStats, CachedValue, Lookup, LookupOutcome, PutOptions,
    spawn_cleanup_task,
};
pub use period::{PeriodCalendar, PeriodKey};
pub use policy::{EvictionPolicy, ParseEvictionPolicyError};
