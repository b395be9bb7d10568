//! Cache eviction policies

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::manager::CacheEntry;

/// Error type for parsing eviction policy
#[derive(Debug, Clone)]
pub struct ParseEvictionPolicyError(String);

impl fmt::Display for ParseEvictionPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid eviction policy: {}", self.0)
    }
}

impl std::error::Error for ParseEvictionPolicyError {}

/// Eviction policy applied once the cache holds more than its maximum entry count
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least Recently Used - evict entries that haven't been read recently
    #[default]
    Lru,
    /// Least Frequently Used - evict entries with the lowest access count
    Lfu,
    /// First In First Out - evict the oldest insertions first
    Fifo,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        }
    }

    /// Order two entries so that the first to evict sorts lowest
    pub(crate) fn compare(&self, a: &CacheEntry, b: &CacheEntry) -> Ordering {
        match self {
            EvictionPolicy::Lru => a
                .last_accessed
                .cmp(&b.last_accessed)
                .then(a.seq.cmp(&b.seq)),
            EvictionPolicy::Lfu => a
                .access_count
                .cmp(&b.access_count)
                .then(a.last_accessed.cmp(&b.last_accessed))
                .then(a.seq.cmp(&b.seq)),
            EvictionPolicy::Fifo => a.seq.cmp(&b.seq),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = ParseEvictionPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            _ => Err(ParseEvictionPolicyError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!("LRU".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!("lfu".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lfu);
        assert!("random".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::Lru);
    }
}
