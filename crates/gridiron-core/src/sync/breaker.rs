//! Per-source circuit breaker
//!
//! Tracks consecutive failures per source. Once a source reaches the failure
//! threshold it is skipped until the cooldown has elapsed since its last
//! attempt, after which a single probe run is let through.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    /// Cooldown elapsed; the next attempt is a probe
    HalfOpen,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Health status for a source
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub source: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub circuit: CircuitState,
}

impl SourceHealth {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            healthy: true,
            consecutive_failures: 0,
            last_attempt: None,
            last_error: None,
            circuit: CircuitState::Closed,
        }
    }
}

pub struct CircuitBreaker {
    /// Zero disables the breaker
    threshold: u32,
    cooldown: chrono::Duration,
    clock: Arc<dyn Clock>,
    states: RwLock<HashMap<String, SourceHealth>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold,
            cooldown: chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX),
            clock,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Restore a source's failure streak, e.g. from the sync log at startup
    pub fn seed(&self, source: &str, failures: u32, last_failure: Option<DateTime<Utc>>) {
        if failures == 0 {
            return;
        }
        let mut states = self.states.write();
        let state = states
            .entry(source.to_string())
            .or_insert_with(|| SourceHealth::new(source));
        state.healthy = false;
        state.consecutive_failures = failures;
        state.last_attempt = last_failure;
        debug!("Seeded breaker for {} with {} failures", source, failures);
    }

    /// Current circuit state of a source
    pub fn state(&self, source: &str) -> CircuitState {
        let states = self.states.read();
        states
            .get(source)
            .map(|s| self.circuit_of(s, self.clock.now()))
            .unwrap_or(CircuitState::Closed)
    }

    /// Whether the source may be attempted now
    pub fn allow(&self, source: &str) -> bool {
        self.state(source) != CircuitState::Open
    }

    pub fn record_success(&self, source: &str) {
        let now = self.clock.now();
        let mut states = self.states.write();
        let state = states
            .entry(source.to_string())
            .or_insert_with(|| SourceHealth::new(source));
        if !state.healthy {
            info!("Source {} recovered", source);
        }
        state.healthy = true;
        state.consecutive_failures = 0;
        state.last_error = None;
        state.last_attempt = Some(now);
    }

    pub fn record_failure(&self, source: &str, error: &str) {
        let now = self.clock.now();
        let mut states = self.states.write();
        let state = states
            .entry(source.to_string())
            .or_insert_with(|| SourceHealth::new(source));
        state.healthy = false;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_error = Some(error.to_string());
        state.last_attempt = Some(now);

        if self.threshold > 0 && state.consecutive_failures == self.threshold {
            warn!(
                "Circuit opened for source {} after {} consecutive failures",
                source, state.consecutive_failures
            );
        } else {
            debug!(
                "Source {} failed: {} (failures: {})",
                source, error, state.consecutive_failures
            );
        }
    }

    /// Health of every source seen so far, by name
    pub fn snapshot(&self) -> Vec<SourceHealth> {
        let now = self.clock.now();
        let states = self.states.read();
        let mut health: Vec<SourceHealth> = states
            .values()
            .map(|s| SourceHealth {
                circuit: self.circuit_of(s, now),
                ..s.clone()
            })
            .collect();
        health.sort_by(|a, b| a.source.cmp(&b.source));
        health
    }

    fn circuit_of(&self, state: &SourceHealth, now: DateTime<Utc>) -> CircuitState {
        if self.threshold == 0 || state.consecutive_failures < self.threshold {
            return CircuitState::Closed;
        }
        match state.last_attempt {
            Some(last)
                if last
                    .checked_add_signed(self.cooldown)
                    .is_none_or(|until| now < until) =>
            {
                CircuitState::Open
            }
            _ => CircuitState::HalfOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (
            CircuitBreaker::new(threshold, Duration::from_secs(300), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_opens_after_threshold_and_probes_after_cooldown() {
        let (breaker, clock) = breaker(3);
        for _ in 0..2 {
            breaker.record_failure("games", "503");
        }
        assert!(breaker.allow("games"));

        breaker.record_failure("games", "503");
        assert_eq!(breaker.state("games"), CircuitState::Open);
        assert!(!breaker.allow("games"));

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(breaker.state("games"), CircuitState::HalfOpen);
        assert!(breaker.allow("games"));

        // Failed probe re-opens for another cooldown
        breaker.record_failure("games", "503");
        assert!(!breaker.allow("games"));

        clock.advance(chrono::Duration::minutes(5));
        breaker.record_success("games");
        assert_eq!(breaker.state("games"), CircuitState::Closed);
        assert_eq!(breaker.snapshot()[0].consecutive_failures, 0);
    }

    #[test]
    fn test_zero_threshold_never_opens() {
        let (breaker, _clock) = breaker(0);
        for _ in 0..10 {
            breaker.record_failure("teams", "down");
        }
        assert!(breaker.allow("teams"));
    }

    #[test]
    fn test_seed_restores_open_circuit() {
        let (breaker, clock) = breaker(2);
        breaker.seed("injuries", 4, Some(clock.now() - chrono::Duration::minutes(1)));
        assert!(!breaker.allow("injuries"));
        assert!(breaker.allow("teams"));

        let health = breaker.snapshot();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].circuit, CircuitState::Open);
        assert!(!health[0].healthy);
    }
}
