//! Resilient fetch wrapper
//!
//! Every upstream call goes through [`ResilientFetcher::call`], which layers
//! an optional cache short-circuit, a per-attempt timeout, response shape
//! validation, bounded retry with backoff and a caller-supplied fallback.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, PutOptions};
use crate::error::{AttemptError, BoxError, FetchError};
use gridiron_upstream::UpstreamError;

/// Upper bound on a delay requested through `Retry-After`
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Linear,
    #[default]
    Exponential,
}

impl Backoff {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backoff::Linear => "linear",
            Backoff::Exponential => "exponential",
        }
    }
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Backoff::Linear),
            "exponential" => Ok(Backoff::Exponential),
            _ => Err(format!("Invalid backoff: {}", s)),
        }
    }
}

/// Options for a single wrapped call
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Total number of attempts, at least one
    pub retries: u32,
    pub backoff_base: Duration,
    pub backoff: Backoff,
    /// Deadline for each attempt
    pub timeout: Duration,
    /// Serve from and store into the cache under this key
    pub cache_key: Option<String>,
    pub cache_ttl: Duration,
    pub cache_tags: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff: Backoff::Exponential,
            timeout: Duration::from_secs(10),
            cache_key: None,
            cache_ttl: Duration::from_secs(60),
            cache_tags: Vec::new(),
        }
    }
}

impl FetchOptions {
    /// Delay after failed attempt `attempt` (1-based)
    ///
    /// `base * n` for linear, `base * 2^(n-1)` for exponential.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Linear => self.backoff_base.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.backoff_base.saturating_mul(factor)
            }
        }
    }

    fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    /// Delay before retrying after `error`
    ///
    /// A rate-limit response's `Retry-After` is a floor on the backoff,
    /// capped at [`MAX_RETRY_AFTER`].
    pub fn retry_delay(&self, attempt: u32, error: &AttemptError) -> Duration {
        let delay = self.delay_after(attempt);
        match error.retry_after() {
            Some(requested) => delay.max(requested.min(MAX_RETRY_AFTER)),
            None => delay,
        }
    }
}

/// Where a fetched value came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum FetchOrigin {
    Cache,
    Upstream { attempts: u32 },
    /// Every attempt failed; `cause` is the last attempt's error
    Fallback { attempts: u32, cause: String },
}

impl FetchOrigin {
    pub fn is_fallback(&self) -> bool {
        matches!(self, FetchOrigin::Fallback { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub origin: FetchOrigin,
}

/// Composes timeout, retry, validation, cache and fallback around upstream calls
#[derive(Clone, Default)]
pub struct ResilientFetcher {
    cache: Option<Arc<CacheLayer>>,
}

impl ResilientFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the cache short-circuit for calls that set `cache_key`
    pub fn with_cache(cache: Arc<CacheLayer>) -> Self {
        Self { cache: Some(cache) }
    }

    /// Run `operation` with retries, falling back to `fallback` once all
    /// attempts have failed
    ///
    /// The JSON returned by `operation` must deserialize into `T`; a shape
    /// mismatch counts as a failed attempt. Every failure is retried up to the
    /// attempt bound; transient and permanent failures are only told apart in
    /// logs and the `gridiron_fetch_failures_total` counter. The fallback is
    /// invoked at most once and only after the last attempt.
    pub async fn call<T, Op, OpFut, Fb, FbFut>(
        &self,
        name: &str,
        mut operation: Op,
        fallback: Fb,
        options: &FetchOptions,
    ) -> Result<Fetched<T>, FetchError>
    where
        T: DeserializeOwned + Serialize,
        Op: FnMut() -> OpFut,
        OpFut: Future<Output = Result<Value, UpstreamError>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, BoxError>>,
    {
        if let Some(value) = self.cached::<T>(options).await {
            debug!(operation = name, "Served from cache");
            return Ok(Fetched {
                value,
                origin: FetchOrigin::Cache,
            });
        }

        let max_attempts = options.attempts();
        let mut attempt = 0;

        let primary = loop {
            attempt += 1;
            metrics::counter!("gridiron_fetch_attempts_total").increment(1);

            match Self::attempt::<T, _, _>(&mut operation, options.timeout).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = name, attempt, "Succeeded after retry");
                    }
                    self.store(&value, options).await;
                    return Ok(Fetched {
                        value,
                        origin: FetchOrigin::Upstream { attempts: attempt },
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    let transient = record_failure(&e);
                    warn!(operation = name, attempt, transient, error = %e, "Attempts exhausted");
                    break e;
                }
                Err(e) => {
                    let transient = record_failure(&e);
                    let delay = options.retry_delay(attempt, &e);
                    warn!(
                        operation = name,
                        attempt,
                        transient,
                        error = %e,
                        "Attempt failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
            }
        };

        metrics::counter!("gridiron_fetch_fallbacks_total").increment(1);
        match fallback().await {
            Ok(value) => Ok(Fetched {
                value,
                origin: FetchOrigin::Fallback {
                    attempts: attempt,
                    cause: primary.to_string(),
                },
            }),
            Err(fallback) => Err(FetchError::Exhausted {
                operation: name.to_string(),
                attempts: attempt,
                primary,
                fallback,
            }),
        }
    }

    async fn attempt<T, Op, OpFut>(operation: &mut Op, deadline: Duration) -> Result<T, AttemptError>
    where
        T: DeserializeOwned,
        Op: FnMut() -> OpFut,
        OpFut: Future<Output = Result<Value, UpstreamError>>,
    {
        let payload = timeout(deadline, operation())
            .await
            .map_err(|_| AttemptError::Timeout(deadline))??;
        Ok(serde_json::from_value(payload)?)
    }

    async fn cached<T: DeserializeOwned>(&self, options: &FetchOptions) -> Option<T> {
        let cache = self.cache.as_ref()?;
        let key = options.cache_key.as_deref()?;
        let hit = cache.get(key).await?;
        match serde_json::from_slice(&hit.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, value: &T, options: &FetchOptions) {
        let (Some(cache), Some(key)) = (&self.cache, options.cache_key.as_deref()) else {
            return;
        };
        match serde_json::to_vec(value) {
            Ok(encoded) => {
                let put = PutOptions::new(options.cache_ttl).tags(options.cache_tags.iter().cloned());
                cache.put(key, Bytes::from(encoded), put).await;
            }
            Err(e) => warn!("Failed to encode response for cache key {}: {}", key, e),
        }
    }
}

/// Count a failed attempt by kind; returns whether it was transient
fn record_failure(error: &AttemptError) -> bool {
    let transient = error.is_transient();
    let kind = if transient { "transient" } else { "permanent" };
    metrics::counter!("gridiron_fetch_failures_total", "kind" => kind).increment(1);
    transient
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(retries: u32) -> FetchOptions {
        FetchOptions {
            retries,
            backoff_base: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn failing() -> UpstreamError {
        UpstreamError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    async fn no_fallback<T>() -> Result<T, BoxError> {
        Err("no fallback".into())
    }

    #[test]
    fn test_backoff_strictly_increasing() {
        for backoff in [Backoff::Linear, Backoff::Exponential] {
            let options = FetchOptions {
                backoff,
                backoff_base: Duration::from_millis(100),
                ..Default::default()
            };
            let delays: Vec<_> = (1..=5).map(|n| options.delay_after(n)).collect();
            assert!(delays.windows(2).all(|w| w[0] < w[1]), "{:?}", delays);
        }

        let linear = FetchOptions {
            backoff: Backoff::Linear,
            backoff_base: Duration::from_millis(100),
            ..Default::default()
        };
        assert_eq!(linear.delay_after(3), Duration::from_millis(300));

        let exponential = FetchOptions {
            backoff: Backoff::Exponential,
            backoff_base: Duration::from_millis(100),
            ..Default::default()
        };
        assert_eq!(exponential.delay_after(1), Duration::from_millis(100));
        assert_eq!(exponential.delay_after(4), Duration::from_millis(800));
    }

    #[test]
    fn test_parse_backoff() {
        assert_eq!("Linear".parse::<Backoff>().unwrap(), Backoff::Linear);
        assert!("random".parse::<Backoff>().is_err());
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let fetcher = ResilientFetcher::new();

        let fetched: Fetched<Vec<u32>> = fetcher
            .call(
                "teams",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 { Err(failing()) } else { Ok(json!([1, 2, 3])) }
                    }
                },
                no_fallback,
                &quick(3),
            )
            .await
            .unwrap();

        assert_eq!(fetched.value, vec![1, 2, 3]);
        assert_eq!(fetched.origin, FetchOrigin::Upstream { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_bound_then_single_fallback() {
        let calls = AtomicUsize::new(0);
        let fallbacks = AtomicUsize::new(0);
        let fetcher = ResilientFetcher::new();

        let fetched: Fetched<Vec<u32>> = fetcher
            .call(
                "games",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(failing()) }
                },
                || {
                    fallbacks.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Vec::new()) }
                },
                &quick(4),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
        assert!(fetched.value.is_empty());
        match fetched.origin {
            FetchOrigin::Fallback { attempts, cause } => {
                assert_eq!(attempts, 4);
                assert!(cause.contains("503"));
            }
            other => panic!("unexpected origin {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let calls = AtomicUsize::new(0);
        let fetched: Fetched<Vec<u32>> = ResilientFetcher::new()
            .call(
                "games",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(failing()) }
                },
                || async { Ok(Vec::new()) },
                &quick(0),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(fetched.origin.is_fallback());
    }

    #[tokio::test]
    async fn test_failed_fallback_keeps_both_errors() {
        let err = ResilientFetcher::new()
            .call::<Vec<u32>, _, _, _, _>(
                "injuries",
                || async { Err(failing()) },
                no_fallback,
                &quick(2),
            )
            .await
            .unwrap_err();

        let FetchError::Exhausted {
            operation,
            attempts,
            primary,
            fallback,
        } = err;
        assert_eq!(operation, "injuries");
        assert_eq!(attempts, 2);
        assert!(matches!(primary, AttemptError::Upstream(_)));
        assert_eq!(fallback.to_string(), "no fallback");
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let calls = AtomicUsize::new(0);
        let options = FetchOptions {
            timeout: Duration::from_millis(20),
            ..quick(2)
        };

        let fetched: Fetched<Vec<u32>> = ResilientFetcher::new()
            .call(
                "slow",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        sleep(Duration::from_secs(5)).await;
                        Ok(json!([]))
                    }
                },
                || async { Ok(vec![7]) },
                &options,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fetched.value, vec![7]);
        match fetched.origin {
            FetchOrigin::Fallback { cause, .. } => assert!(cause.contains("timed out")),
            other => panic!("unexpected origin {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_retried() {
        let calls = AtomicUsize::new(0);
        let fetched: Fetched<Vec<u32>> = ResilientFetcher::new()
            .call(
                "teams",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Ok(json!({"unexpected": true}))
                        } else {
                            Ok(json!([4]))
                        }
                    }
                },
                no_fallback,
                &quick(2),
            )
            .await
            .unwrap();
        assert_eq!(fetched.value, vec![4]);
        assert_eq!(fetched.origin, FetchOrigin::Upstream { attempts: 2 });
    }

    #[test]
    fn test_retry_after_is_a_capped_floor() {
        let options = FetchOptions {
            backoff: Backoff::Linear,
            backoff_base: Duration::from_millis(500),
            ..Default::default()
        };
        let limited = |secs| {
            AttemptError::Upstream(UpstreamError::RateLimited {
                retry_after: Some(secs),
            })
        };

        assert_eq!(options.retry_delay(1, &limited(2)), Duration::from_secs(2));
        // Backoff already past the requested delay
        assert_eq!(options.retry_delay(6, &limited(2)), Duration::from_secs(3));
        assert_eq!(options.retry_delay(1, &limited(3600)), MAX_RETRY_AFTER);
        assert_eq!(
            options.retry_delay(1, &AttemptError::Upstream(failing())),
            Duration::from_millis(500)
        );
    }

    #[tokio::test]
    async fn test_rate_limited_attempt_waits_for_retry_after() {
        let calls = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();

        let fetched: Fetched<Vec<u32>> = ResilientFetcher::new()
            .call(
                "players",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(UpstreamError::RateLimited {
                                retry_after: Some(1),
                            })
                        } else {
                            Ok(json!([9]))
                        }
                    }
                },
                no_fallback,
                &quick(2),
            )
            .await
            .unwrap();

        assert_eq!(fetched.value, vec![9]);
        assert_eq!(fetched.origin, FetchOrigin::Upstream { attempts: 2 });
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_attempt_failures_are_classified() {
        assert!(AttemptError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(AttemptError::Upstream(failing()).is_transient());
        assert!(!AttemptError::Upstream(UpstreamError::Unauthorized).is_transient());
        let shape = serde_json::from_value::<Vec<u32>>(json!({})).unwrap_err();
        assert!(AttemptError::Shape(shape).is_transient());
    }

    #[tokio::test]
    async fn test_permanent_failure_keeps_attempt_bound() {
        let calls = AtomicUsize::new(0);
        let fallbacks = AtomicUsize::new(0);

        let fetched: Fetched<Vec<u32>> = ResilientFetcher::new()
            .call(
                "injuries",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(UpstreamError::Unauthorized) }
                },
                || {
                    fallbacks.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Vec::new()) }
                },
                &quick(3),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
        match fetched.origin {
            FetchOrigin::Fallback { attempts, cause } => {
                assert_eq!(attempts, 3);
                assert!(cause.contains("unauthorized"));
            }
            other => panic!("unexpected origin {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cache_short_circuit() {
        let cache = Arc::new(CacheLayer::new(CacheConfig::default()));
        let fetcher = ResilientFetcher::with_cache(cache.clone());
        let calls = AtomicUsize::new(0);
        let options = FetchOptions {
            cache_key: Some("upstream:teams".to_string()),
            cache_tags: vec!["teams".to_string()],
            ..quick(1)
        };

        for expected in [FetchOrigin::Upstream { attempts: 1 }, FetchOrigin::Cache] {
            let fetched: Fetched<Vec<u32>> = fetcher
                .call(
                    "teams",
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Ok(json!([1])) }
                    },
                    no_fallback,
                    &options,
                )
                .await
                .unwrap();
            assert_eq!(fetched.origin, expected);
            assert_eq!(fetched.value, vec![1]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate_tag("teams").await;
        let fetched: Fetched<Vec<u32>> = fetcher
            .call("teams", || async { Ok(json!([2])) }, no_fallback, &options)
            .await
            .unwrap();
        assert_eq!(fetched.value, vec![2]);
    }
}
