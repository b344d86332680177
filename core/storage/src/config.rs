//! Named endpoint configuration.
//!
//! An endpoints file maps names to a provider plus its auth and identity
//! payloads:
//!
//! ```json
//! {
//!   "scratch": { "provider": "memory", "identity": { "bucket": "scratch" } },
//!   "drive": { "provider": "gdrive", "auth": { "token": "..." } }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use unistore_common::{Credentials, Error, Result};

use crate::provider::StorageProvider;
use crate::registry::ProviderRegistry;

/// One configured endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Registry name of the backend (e.g. "local", "gdrive").
    pub provider: String,
    /// Authentication payload.
    #[serde(default)]
    pub auth: Credentials,
    /// Identity payload locating the account or resource root.
    #[serde(default)]
    pub identity: Credentials,
}

/// All endpoints known to a caller, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointsConfig {
    endpoints: BTreeMap<String, EndpointConfig>,
}

impl EndpointsConfig {
    /// Read and parse an endpoints file.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Serialization` if it is not a valid endpoints document
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = content.parse()?;
        debug!(path = %path.display(), endpoints = config.endpoints.len(), "loaded endpoints");
        Ok(config)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn insert(&mut self, name: impl Into<String>, endpoint: EndpointConfig) {
        self.endpoints.insert(name.into(), endpoint);
    }

    /// Configured endpoint names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Look up an endpoint by name.
    ///
    /// # Errors
    /// - `Config` if no endpoint has that name
    pub fn endpoint(&self, name: &str) -> Result<&EndpointConfig> {
        self.endpoints
            .get(name)
            .ok_or_else(|| Error::Config(format!("Unknown endpoint '{}'", name)))
    }

    /// Construct the provider for a named endpoint.
    pub fn connect(&self, name: &str, registry: &ProviderRegistry) -> Result<Arc<dyn StorageProvider>> {
        let endpoint = self.endpoint(name)?;
        registry.create(
            &endpoint.provider,
            Some(endpoint.auth.clone()),
            Some(endpoint.identity.clone()),
        )
    }
}

impl FromStr for EndpointsConfig {
    type Err = Error;

    fn from_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::create_default_registry;

    const CONFIG: &str = r#"{
        "scratch": { "provider": "memory", "identity": { "bucket": "scratch" } },
        "mirror": { "provider": "memory", "auth": { "token": "x" }, "identity": { "bucket": "scratch" } },
        "cloud": { "provider": "dropbox" }
    }"#;

    #[test]
    fn test_parse_defaults_payloads() {
        let config: EndpointsConfig = CONFIG.parse().unwrap();
        let cloud = config.endpoint("cloud").unwrap();
        assert_eq!(cloud.provider, "dropbox");
        assert!(cloud.auth.is_empty());
        assert!(cloud.identity.is_empty());
        assert_eq!(config.names().collect::<Vec<_>>(), vec!["cloud", "mirror", "scratch"]);
    }

    #[test]
    fn test_parse_invalid() {
        let result = "{ \"a\": { \"identity\": {} } }".parse::<EndpointsConfig>();
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_unknown_endpoint() {
        let config = EndpointsConfig::default();
        assert!(matches!(config.endpoint("nope"), Err(Error::Config(_))));
    }

    #[test]
    fn test_connect() {
        let config: EndpointsConfig = CONFIG.parse().unwrap();
        let registry = create_default_registry();

        let scratch = config.connect("scratch", &registry).unwrap();
        let mirror = config.connect("mirror", &registry).unwrap();
        assert_eq!(scratch.name(), "memory");
        assert!(*scratch == *mirror);

        let result = config.connect("cloud", &registry);
        assert!(matches!(result, Err(Error::UnsupportedProvider(_))));
    }

    #[tokio::test]
    async fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unistore.json");

        let mut config = EndpointsConfig::default();
        config.insert(
            "disk",
            EndpointConfig {
                provider: "local".to_string(),
                auth: Credentials::new(),
                identity: serde_json::json!({ "root": "/tmp/data" })
                    .as_object()
                    .unwrap()
                    .clone(),
            },
        );
        tokio::fs::write(&path, config.to_json().unwrap()).await.unwrap();

        let loaded = EndpointsConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = EndpointsConfig::load("/nonexistent/unistore.json").await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
