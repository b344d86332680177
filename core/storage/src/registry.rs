//! Provider registry for dynamic provider resolution.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use unistore_common::{Credentials, Error, Result};

use crate::gdrive::GDriveProvider;
use crate::local::LocalProvider;
use crate::memory::{MemoryBuckets, MemoryProvider};
use crate::provider::StorageProvider;

/// Constructor for a provider, taking `(auth, identity)`.
pub type ProviderFactory =
    Box<dyn Fn(Credentials, Credentials) -> Result<Arc<dyn StorageProvider>> + Send + Sync>;

/// Registry for storage provider factories.
///
/// Built once at startup, populated while backends are wired in, and read
/// only afterwards. Pass it explicitly to whatever needs to construct
/// providers.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// Registering a name twice replaces the earlier factory and logs a
    /// warning.
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) {
        let name = name.into();
        if self.factories.contains_key(&name) {
            warn!(provider = %name, "provider is already registered, replacing it");
        }
        self.factories.insert(name, factory);
    }

    /// Get the factory registered under `name`.
    ///
    /// # Errors
    /// - `UnsupportedProvider` if nothing is registered under `name`
    pub fn lookup(&self, name: &str) -> Result<&ProviderFactory> {
        self.factories
            .get(name)
            .ok_or_else(|| Error::UnsupportedProvider(format!("No provider for '{}'", name)))
    }

    /// Construct a provider.
    ///
    /// Missing `auth` or `identity` become empty payloads; validating them is
    /// left to the provider's constructor.
    pub fn create(
        &self,
        name: &str,
        auth: Option<Credentials>,
        identity: Option<Credentials>,
    ) -> Result<Arc<dyn StorageProvider>> {
        let factory = self.lookup(name)?;
        factory(auth.unwrap_or_default(), identity.unwrap_or_default())
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in providers.
pub fn create_default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    // Instances naming the same bucket share a store.
    let buckets = MemoryBuckets::default();
    registry.register(
        "memory",
        Box::new(move |_auth, identity| {
            Ok(Arc::new(MemoryProvider::from_identity(&buckets, identity)?))
        }),
    );

    registry.register(
        "local",
        Box::new(|_auth, identity| Ok(Arc::new(LocalProvider::from_identity(identity)?))),
    );

    registry.register(
        "gdrive",
        Box::new(|auth, identity| Ok(Arc::new(GDriveProvider::from_credentials(auth, identity)?))),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(bucket: &str) -> Credentials {
        json!({ "bucket": bucket }).as_object().unwrap().clone()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register("test", Box::new(|_, _| Ok(Arc::new(MemoryProvider::new()))));

        let factory = registry.lookup("test").unwrap();
        let provider = factory(Credentials::new(), Credentials::new()).unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn test_reregistration_replaces_factory() {
        let mut registry = ProviderRegistry::new();
        let buckets = MemoryBuckets::default();
        let first = buckets.clone();
        registry.register(
            "test",
            Box::new(move |_, _| Ok(Arc::new(MemoryProvider::from_identity(&first, identity("first"))?))),
        );
        registry.register(
            "test",
            Box::new(move |_, _| Ok(Arc::new(MemoryProvider::from_identity(&buckets, identity("second"))?))),
        );

        let provider = registry.create("test", None, None).unwrap();
        assert_eq!(provider.identity()["bucket"], "second");
        assert_eq!(registry.providers(), vec!["test".to_string()]);
    }

    #[test]
    fn test_lookup_unknown_fails() {
        let registry = ProviderRegistry::new();
        let result = registry.lookup("unknown");
        assert!(matches!(result, Err(Error::UnsupportedProvider(_))));

        let result = registry.create("unknown", None, None);
        assert!(matches!(result, Err(Error::UnsupportedProvider(_))));
    }

    #[test]
    fn test_create_defaults_missing_payloads() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            "echo",
            Box::new(|auth, identity| {
                assert!(auth.is_empty());
                assert!(identity.is_empty());
                Ok(Arc::new(MemoryProvider::new()))
            }),
        );

        assert!(registry.create("echo", None, None).is_ok());
    }

    #[test]
    fn test_default_registry_providers() {
        let registry = create_default_registry();
        assert_eq!(registry.providers(), vec!["gdrive", "local", "memory"]);
        assert!(registry.has_provider("local"));
        assert!(!registry.has_provider("s3"));
    }

    #[test]
    fn test_equal_identity_different_auth_is_same_endpoint() {
        let registry = create_default_registry();
        let a = registry
            .create(
                "memory",
                Some(json!({"token": "a"}).as_object().unwrap().clone()),
                Some(identity("shared")),
            )
            .unwrap();
        let b = registry
            .create(
                "memory",
                Some(json!({"token": "b"}).as_object().unwrap().clone()),
                Some(identity("shared")),
            )
            .unwrap();
        let c = registry.create("memory", None, Some(identity("other"))).unwrap();

        assert!(*a == *b);
        assert!(*a != *c);
    }

    #[test]
    fn test_different_types_never_equal() {
        let registry = create_default_registry();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();

        let local = registry
            .create("local", None, Some(json!({"root": root}).as_object().unwrap().clone()))
            .unwrap();
        let memory = registry
            .create("memory", None, Some(json!({"root": root}).as_object().unwrap().clone()))
            .unwrap();

        assert!(!local.is_same_endpoint(memory.as_ref()));
    }
}
