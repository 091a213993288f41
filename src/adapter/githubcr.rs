//! GitHub Container Registry
//!
//! `ghcr.io` has no usable catalog, so listing only works from a
//! wildcard-free name filter. The credential is a user name and a personal
//! access token.

use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter};
use crate::error::{ReplicationError, Result};
use crate::model::filter::name_pattern;
use crate::model::{AdapterPattern, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource};
use crate::util::is_specific_path;
use async_trait::async_trait;
use std::sync::Arc;

pub const GHCR_URL: &str = "https://ghcr.io";

pub struct GithubCrAdapter {
    native: NativeAdapter,
}

impl GithubCrAdapter {
    pub fn new(native: NativeAdapter) -> Self {
        Self { native }
    }
}

#[async_trait]
impl Adapter for GithubCrAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::GITHUB_GHCR, "GitHub Container Registry")
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        self.native.health_check().await
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for GithubCrAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let pattern = name_pattern(filters).unwrap_or_default();
        if is_specific_path(pattern).is_none() {
            return Err(ReplicationError::invalid(format!(
                "ghcr needs repository names without wildcards, got: {:?}",
                pattern
            )));
        }
        self.native.fetch_artifacts(filters).await
    }
}

struct GithubCrFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for GithubCrFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        Ok(Arc::new(GithubCrAdapter::new(NativeAdapter::new(&self.ctx, registry)?)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(vec![Endpoint::new("ghcr.io", GHCR_URL)])
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::GITHUB_GHCR, Arc::new(GithubCrFactory { ctx: ctx.clone() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClient;

    #[tokio::test]
    async fn test_wildcards_rejected() {
        let registry = Registry::new("gh", RegistryType::GITHUB_GHCR, "http://127.0.0.1:1");
        let native = NativeAdapter::with_http(&registry, HttpClient::new(reqwest::Client::new())).unwrap();
        let adapter = GithubCrAdapter::new(native);
        for filters in [vec![], vec![Filter::name("org/*")]] {
            assert!(matches!(
                adapter.fetch_artifacts(&filters).await,
                Err(ReplicationError::InvalidArgument(_))
            ));
        }
    }
}
