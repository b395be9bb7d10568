//! Upstream source trait

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::error::UpstreamError;

/// An independently operated data provider
///
/// A source only knows how to fetch its raw payload. It makes one attempt
/// per call; retries, timeouts and fallbacks belong to the caller.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Name used in logs and the sync log
    fn name(&self) -> &str;

    /// Fetch the raw payload
    async fn fetch(&self) -> Result<Value, UpstreamError>;
}

type FetchFn = dyn Fn() -> BoxFuture<'static, Result<Value, UpstreamError>> + Send + Sync;

/// Source backed by a closure
///
/// Lets embedders plug in providers that are not plain HTTP endpoints.
#[derive(Clone)]
pub struct FnSource {
    name: String,
    fetch: Arc<FetchFn>,
}

impl FnSource {
    pub fn new<F>(name: impl Into<String>, fetch: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Value, UpstreamError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            fetch: Arc::new(fetch),
        }
    }

    /// Source that always returns the same payload
    pub fn fixed(name: impl Into<String>, payload: Value) -> Self {
        Self::new(name, move || {
            let payload = payload.clone();
            Box::pin(async move { Ok(payload) })
        })
    }
}

impl std::fmt::Debug for FnSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource").field("name", &self.name).finish()
    }
}

#[async_trait]
impl UpstreamSource for FnSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Value, UpstreamError> {
        (self.fetch)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fixed_source() {
        let source = FnSource::fixed("teams", json!([{"name": "Chicago Bears"}]));
        assert_eq!(source.name(), "teams");
        let payload = source.fetch().await.unwrap();
        assert_eq!(payload[0]["name"], "Chicago Bears");
    }

    #[tokio::test]
    async fn test_closure_source_runs_each_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = FnSource::new("games", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    Err(UpstreamError::Status {
                        status: 502,
                        message: "bad gateway".to_string(),
                    })
                } else {
                    Ok(json!([]))
                }
            })
        });

        assert!(source.fetch().await.is_err());
        assert!(source.fetch().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
