//! Google Container Registry
//!
//! Plain distribution API. The credential is a service-account JSON key
//! sent as the password of the fixed `_json_key` user.

use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter};
use crate::error::Result;
use crate::model::{
    AdapterPattern, Credential, CredentialFieldType, CredentialPattern, Endpoint, Filter, HealthStatus, Registry,
    RegistryInfo, RegistryType, Resource,
};
use async_trait::async_trait;
use std::sync::Arc;

pub const JSON_KEY_USER: &str = "_json_key";

const ENDPOINTS: &[(&str, &str)] = &[
    ("gcr.io", "https://gcr.io"),
    ("us.gcr.io", "https://us.gcr.io"),
    ("eu.gcr.io", "https://eu.gcr.io"),
    ("asia.gcr.io", "https://asia.gcr.io"),
];

pub struct GcrAdapter {
    native: NativeAdapter,
}

impl GcrAdapter {
    pub fn new(native: NativeAdapter) -> Self {
        Self { native }
    }
}

/// Forces the `_json_key` user whatever access key was stored
pub fn json_key_registry(registry: &Registry) -> Registry {
    let mut registry = registry.clone();
    if let Some(credential) = registry.credential.take() {
        registry.credential = Some(Credential::basic(JSON_KEY_USER, credential.access_secret));
    }
    registry
}

#[async_trait]
impl Adapter for GcrAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::GOOGLE_GCR, "Google Container Registry")
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        self.native.health_check().await
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for GcrAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        self.native.fetch_artifacts(filters).await
    }
}

struct GcrFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for GcrFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let native = NativeAdapter::new(&self.ctx, &json_key_registry(registry))?;
        Ok(Arc::new(GcrAdapter::new(native)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(ENDPOINTS.iter().map(|(k, v)| Endpoint::new(*k, *v)).collect()).with_credential(
            CredentialPattern {
                access_key_type: CredentialFieldType::Fix,
                access_key_data: JSON_KEY_USER.to_string(),
                access_secret_type: CredentialFieldType::File,
                access_secret_data: "No Change".to_string(),
            },
        )
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::GOOGLE_GCR, Arc::new(GcrFactory { ctx: ctx.clone() }))
}
