//! HTTP JSON upstream source

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::UpstreamError;
use crate::source::UpstreamSource;

/// HTTP source configuration
#[derive(Clone, Debug)]
pub struct HttpSourceConfig {
    /// Source name, also the sync log key
    pub name: String,
    /// Endpoint returning the JSON payload
    pub url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    /// Per-request deadline enforced by the HTTP client
    pub timeout: Option<Duration>,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
}

impl HttpSourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: None,
            timeout: None,
            skip_tls_verify: false,
        }
    }
}

/// Source that GETs a JSON document
pub struct HttpSource {
    config: HttpSourceConfig,
    client: Client,
}

impl HttpSource {
    /// Create a new HTTP source
    pub fn new(config: HttpSourceConfig) -> Result<Self, UpstreamError> {
        url::Url::parse(&config.url)
            .map_err(|e| UpstreamError::Configuration(format!("{}: {}", config.url, e)))?;

        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        info!("Created HTTP source '{}' for {}", config.name, config.url);

        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl UpstreamSource for HttpSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn fetch(&self) -> Result<Value, UpstreamError> {
        debug!("Fetching {} from {}", self.config.name, self.config.url);

        let mut request = self
            .client
            .get(&self.config.url)
            .header(header::ACCEPT, "application/json");

        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| match (e.is_timeout(), self.config.timeout) {
            (true, Some(timeout)) => UpstreamError::Timeout(timeout),
            _ => UpstreamError::Http(e),
        })?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UpstreamError::Unauthorized);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(UpstreamError::RateLimited { retry_after });
        }

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| UpstreamError::InvalidResponse(format!("{}: {}", self.config.name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_json_with_bearer_token() {
        let app = Router::new().route(
            "/teams",
            get(|headers: HeaderMap| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|h| h.to_str().ok())
                    == Some("Bearer secret");
                if authorized {
                    (StatusCode::OK, axum::Json(json!({"data": [{"name": "Chicago Bears"}]})))
                } else {
                    (StatusCode::UNAUTHORIZED, axum::Json(json!({})))
                }
            }),
        );
        let base = serve(app).await;

        let mut config = HttpSourceConfig::new("teams", format!("{}/teams", base));
        config.api_key = Some("secret".to_string());
        let source = HttpSource::new(config).unwrap();

        let payload = source.fetch().await.unwrap();
        assert_eq!(payload["data"][0]["name"], "Chicago Bears");

        let anonymous =
            HttpSource::new(HttpSourceConfig::new("teams", format!("{}/teams", base))).unwrap();
        assert!(matches!(
            anonymous.fetch().await,
            Err(UpstreamError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_status_errors_are_classified() {
        let app = Router::new()
            .route(
                "/broken",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            )
            .route(
                "/limited",
                get(|| async {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        [(header::RETRY_AFTER, "30")],
                        "slow down",
                    )
                }),
            )
            .route("/garbage", get(|| async { "<html>" }));
        let base = serve(app).await;

        let broken =
            HttpSource::new(HttpSourceConfig::new("games", format!("{}/broken", base))).unwrap();
        let err = broken.fetch().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 502, .. }));
        assert!(err.is_transient());

        let limited =
            HttpSource::new(HttpSourceConfig::new("games", format!("{}/limited", base))).unwrap();
        assert!(matches!(
            limited.fetch().await,
            Err(UpstreamError::RateLimited {
                retry_after: Some(30)
            })
        ));

        let garbage =
            HttpSource::new(HttpSourceConfig::new("games", format!("{}/garbage", base))).unwrap();
        let err = garbage.fetch().await.unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "[]"
            }),
        );
        let base = serve(app).await;

        let mut config = HttpSourceConfig::new("slow", format!("{}/slow", base));
        config.timeout = Some(Duration::from_millis(100));
        let source = HttpSource::new(config).unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            HttpSource::new(HttpSourceConfig::new("bad", "not a url")),
            Err(UpstreamError::Configuration(_))
        ));
    }
}
