//! Azure Container Registry: plain distribution API with Basic credentials

use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter};
use crate::auth::BasicAuthCredential;
use crate::error::{ReplicationError, Result};
use crate::model::{AdapterPattern, EndpointPattern, EndpointType, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource};
use async_trait::async_trait;
use std::sync::Arc;

pub struct AzureAcrAdapter {
    native: NativeAdapter,
}

impl AzureAcrAdapter {
    pub fn new(native: NativeAdapter) -> Self {
        Self { native }
    }
}

#[async_trait]
impl Adapter for AzureAcrAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::AZURE_ACR, "Azure Container Registry")
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        self.native.health_check().await
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for AzureAcrAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        self.native.fetch_artifacts(filters).await
    }
}

struct AzureAcrFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for AzureAcrFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let (username, password) = registry
            .credential_pair()
            .ok_or_else(|| ReplicationError::invalid("azure acr requires a username and password"))?;
        // the registry answers basic challenges, so the credential goes on every request
        let native = NativeAdapter::with_authorizer(
            &self.ctx,
            registry,
            Some(Arc::new(BasicAuthCredential::new(username, password))),
        )?;
        Ok(Arc::new(AzureAcrAdapter::new(native)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern {
            endpoint_pattern: Some(EndpointPattern {
                endpoint_type: EndpointType::Input,
                endpoints: Vec::new(),
            }),
            credential_pattern: None,
        }
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::AZURE_ACR, Arc::new(AzureAcrFactory { ctx: ctx.clone() }))
}
