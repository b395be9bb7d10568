//! Upstream source configuration
//!
//! These types are shared with the server crate, which owns config file
//! loading; here they are turned into runnable sync sources.

use gridiron_db::EntityKind;
use gridiron_upstream::{HttpSource, HttpSourceConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::CoreError;
use crate::sync::SyncSource;

/// One configured upstream source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name, also the sync log key
    pub name: String,
    /// Entity kind the source provides
    pub kind: EntityKind,
    /// Endpoint returning the JSON envelope
    pub url: String,
    /// Sent as a bearer token
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Client-side deadline; the sync timeout still applies on top
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub skip_tls_verify: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, kind: EntityKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            api_key: None,
            enabled: true,
            timeout_secs: None,
            skip_tls_verify: false,
        }
    }

    /// Build an HTTP sync source with the canonical normalizer
    pub fn build(&self) -> Result<SyncSource, CoreError> {
        let http = HttpSource::new(HttpSourceConfig {
            name: self.name.clone(),
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
            skip_tls_verify: self.skip_tls_verify,
        })?;
        Ok(SyncSource::canonical(Arc::new(http), self.kind))
    }
}

/// Build every enabled source, in configuration order
pub fn build_sources(configs: &[SourceConfig]) -> Result<Vec<SyncSource>, CoreError> {
    let mut names = HashSet::new();
    let mut sources = Vec::new();

    for config in configs {
        if config.name.trim().is_empty() {
            return Err(CoreError::Configuration(
                "source name cannot be empty".to_string(),
            ));
        }
        if !names.insert(config.name.as_str()) {
            return Err(CoreError::Configuration(format!(
                "duplicate source name '{}'",
                config.name
            )));
        }
        if !config.enabled {
            info!("Source {} is disabled", config.name);
            continue;
        }
        sources.push(config.build()?);
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sources_skips_disabled() {
        let mut injuries = SourceConfig::new("injuries", EntityKind::Injuries, "http://localhost/injuries");
        injuries.enabled = false;
        let configs = vec![
            SourceConfig::new("teams", EntityKind::Teams, "http://localhost/teams"),
            injuries,
        ];

        let sources = build_sources(&configs).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name(), "teams");
        assert_eq!(sources[0].kind(), EntityKind::Teams);
    }

    #[test]
    fn test_build_sources_rejects_bad_config() {
        let duplicate = vec![
            SourceConfig::new("teams", EntityKind::Teams, "http://localhost/a"),
            SourceConfig::new("teams", EntityKind::Teams, "http://localhost/b"),
        ];
        assert!(matches!(
            build_sources(&duplicate),
            Err(CoreError::Configuration(_))
        ));

        let bad_url = vec![SourceConfig::new("teams", EntityKind::Teams, "not a url")];
        assert!(matches!(build_sources(&bad_url), Err(CoreError::Upstream(_))));
    }

    #[test]
    fn test_deserialize_source() {
        let config: SourceConfig = from_json(
            r#"{"name": "games", "kind": "games", "url": "https://example.com/games"}"#,
        );
        assert!(config.enabled);
        assert_eq!(config.kind, EntityKind::Games);
        assert!(config.api_key.is_none());
    }

    fn from_json(json: &str) -> SourceConfig {
        serde_json::from_str(json).unwrap()
    }
}
