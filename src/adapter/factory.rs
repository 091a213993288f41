//! Factory registry
//!
//! Maps a [`RegistryType`] to the [`Factory`] building its adapters. It is
//! filled once at startup and read afterwards, so lookups take a read lock.

use crate::adapter::Adapter;
use crate::error::{ReplicationError, Result};
use crate::model::{AdapterPattern, Registry, RegistryType};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait Factory: Send + Sync {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>>;

    /// Endpoint and credential hints for the UI
    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::default()
    }
}

#[derive(Default)]
pub struct AdapterRegistry {
    factories: RwLock<BTreeMap<RegistryType, Arc<dyn Factory>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails on an empty type or when the type is already registered
    pub fn register(&self, registry_type: RegistryType, factory: Arc<dyn Factory>) -> Result<()> {
        if registry_type.is_empty() {
            return Err(ReplicationError::invalid("adapter type must not be empty"));
        }
        let mut factories = self.factories.write();
        if factories.contains_key(&registry_type) {
            return Err(ReplicationError::invalid(format!(
                "adapter factory for {} already exists",
                registry_type
            )));
        }
        tracing::debug!(adapter = %registry_type, "adapter factory registered");
        factories.insert(registry_type, factory);
        Ok(())
    }

    pub fn get(&self, registry_type: &RegistryType) -> Result<Arc<dyn Factory>> {
        self.factories
            .read()
            .get(registry_type)
            .cloned()
            .ok_or_else(|| ReplicationError::invalid(format!("adapter factory for {} not found", registry_type)))
    }

    /// Registered types in alphabetical order
    pub fn list_types(&self) -> Vec<RegistryType> {
        self.factories.read().keys().cloned().collect()
    }

    pub fn adapter_patterns(&self) -> BTreeMap<RegistryType, AdapterPattern> {
        self.factories
            .read()
            .iter()
            .map(|(t, f)| (t.clone(), f.adapter_pattern()))
            .collect()
    }

    /// Validates the registry and builds an adapter for it
    pub async fn create_adapter(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        registry.validate()?;
        let factory = self.get(&registry.registry_type)?;
        factory.create(registry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HealthStatus, RegistryInfo};

    struct Dummy;

    #[async_trait]
    impl Adapter for Dummy {
        fn info(&self) -> RegistryInfo {
            RegistryInfo::artifact(RegistryType::new("dummy"), "dummy")
        }
        async fn health_check(&self) -> Result<HealthStatus> {
            Ok(HealthStatus::Healthy)
        }
    }

    struct DummyFactory;

    #[async_trait]
    impl Factory for DummyFactory {
        async fn create(&self, _registry: &Registry) -> Result<Arc<dyn Adapter>> {
            Ok(Arc::new(Dummy))
        }
    }

    #[tokio::test]
    async fn test_register_and_create() {
        let registry = AdapterRegistry::new();
        registry.register(RegistryType::new("zeta"), Arc::new(DummyFactory)).unwrap();
        registry.register(RegistryType::new("alpha"), Arc::new(DummyFactory)).unwrap();

        assert!(registry.register(RegistryType::new(""), Arc::new(DummyFactory)).is_err());
        assert!(registry.register(RegistryType::new("zeta"), Arc::new(DummyFactory)).is_err());
        assert_eq!(registry.list_types(), vec![RegistryType::new("alpha"), RegistryType::new("zeta")]);

        let target = Registry::new("z", RegistryType::new("zeta"), "https://z.example.com");
        let adapter = registry.create_adapter(&target).await.unwrap();
        assert_eq!(adapter.health_check().await.unwrap(), HealthStatus::Healthy);
        assert!(adapter.as_artifact_registry().is_none());

        let unknown = Registry::new("u", RegistryType::new("unknown"), "https://u.example.com");
        assert!(registry.create_adapter(&unknown).await.is_err());
    }
}
