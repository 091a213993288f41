//! Adapter framework
//!
//! An [`Adapter`] is the per-registry handle the transfer layer works with.
//! Capabilities are refinements: an adapter that can move OCI artifacts
//! also implements [`ArtifactRegistry`], one that hosts Helm charts
//! implements [`ChartRegistry`]. Callers discover them with
//! [`Adapter::as_artifact_registry`] / [`Adapter::as_chart_registry`].
//!
//! Adapters built on top of the [`NativeAdapter`] expose it through
//! [`ArtifactRegistry::base`], which makes every distribution operation
//! default to the standard OCI path. Vendors override only what differs.

pub mod artifactory;
pub mod artifacthub;
pub mod aliacr;
pub mod aliacree;
pub mod azurecr;
pub mod dockerhub;
pub mod dtr;
pub mod ecr;
pub mod factory;
pub mod gcr;
pub mod googlegar;
pub mod githubcr;
pub mod gitlab;
pub mod harbor;
pub mod helmhub;
pub mod native;
pub mod quay;
pub mod signing;
pub mod swr;
pub mod tcr;

pub use factory::{AdapterRegistry, Factory};
pub use native::NativeAdapter;

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::http::TransportFactory;
use crate::filter::filter_artifacts;
use crate::model::{Artifact, Filter, HealthStatus, Registry, RegistryInfo, Resource, ResourceMetadata, ResourceType};
use crate::registry::{BlobStream, Descriptor, Manifest};
use crate::util::LimitedConcurrentRunner;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Workers used by adapters when fanning out tag listing
pub const MAX_CONCURRENCY: usize = 10;

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Advertised resource types, filters and triggers
    fn info(&self) -> RegistryInfo;

    /// Creates whatever namespaces or repositories the resources need.
    /// Must be idempotent.
    async fn prepare_for_push(&self, _resources: &[Resource]) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus>;

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        None
    }

    fn as_chart_registry(self: Arc<Self>) -> Option<Arc<dyn ChartRegistry>> {
        None
    }
}

fn no_base() -> ReplicationError {
    ReplicationError::Fatal("operation not supported by this adapter".to_string())
}

/// OCI artifact capability
#[async_trait]
pub trait ArtifactRegistry: Adapter {
    /// Native client backing the default distribution operations
    fn base(&self) -> Option<&NativeAdapter> {
        None
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>>;

    async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<Descriptor>> {
        self.base().ok_or_else(no_base)?.manifest_exist(repository, reference).await
    }

    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted: &[&str],
    ) -> Result<(Manifest, String)> {
        self.base()
            .ok_or_else(no_base)?
            .pull_manifest(repository, reference, accepted)
            .await
    }

    /// Returns the digest of the stored manifest
    async fn push_manifest(&self, repository: &str, reference: &str, media_type: &str, payload: Bytes) -> Result<String> {
        self.base()
            .ok_or_else(no_base)?
            .push_manifest(repository, reference, media_type, payload)
            .await
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        self.base().ok_or_else(no_base)?.delete_manifest(repository, reference).await
    }

    async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool> {
        self.base().ok_or_else(no_base)?.blob_exist(repository, digest).await
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<(u64, BlobStream)> {
        self.base().ok_or_else(no_base)?.pull_blob(repository, digest).await
    }

    async fn push_blob(&self, repository: &str, digest: &str, size: u64, blob: BlobStream) -> Result<()> {
        self.base()
            .ok_or_else(no_base)?
            .push_blob(repository, digest, size, blob)
            .await
    }

    /// Repository already holding the blob in this registry, if a mount is possible
    async fn can_be_mount(&self, _digest: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// `true` when the registry mounted the blob instead of opening an upload
    async fn mount_blob(&self, source_repository: &str, digest: &str, repository: &str) -> Result<bool> {
        self.base()
            .ok_or_else(no_base)?
            .mount_blob(source_repository, digest, repository)
            .await
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        self.base().ok_or_else(no_base)?.delete_tag(repository, tag).await
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.base().ok_or_else(no_base)?.list_tags(repository).await
    }
}

/// Helm chart capability
#[async_trait]
pub trait ChartRegistry: Adapter {
    async fn fetch_charts(&self, filters: &[Filter]) -> Result<Vec<Resource>>;

    async fn chart_exist(&self, name: &str, version: &str) -> Result<bool>;

    /// `content_url` is the download location recorded at fetch time, if any
    async fn download_chart(&self, name: &str, version: &str, content_url: Option<&str>) -> Result<BlobStream>;

    async fn upload_chart(&self, name: &str, version: &str, chart: BlobStream) -> Result<()>;

    async fn delete_chart(&self, name: &str, version: &str) -> Result<()>;
}

/// Shared pieces every factory needs
#[derive(Clone)]
pub struct AdapterContext {
    pub transports: TransportFactory,
    pub config: Arc<ReplicationConfig>,
}

impl AdapterContext {
    pub fn new(config: ReplicationConfig) -> Result<Self> {
        Ok(Self {
            transports: TransportFactory::new(&config)?,
            config: Arc::new(config),
        })
    }

    pub fn client(&self, insecure: bool) -> reqwest::Client {
        self.transports.client(insecure)
    }

    /// Client for talking to the registry itself, honouring its CA bundle
    pub fn registry_client(&self, registry: &Registry) -> Result<reqwest::Client> {
        match &registry.ca_certificate {
            Some(pem) => self.transports.client_with_ca(registry.insecure, pem.as_bytes()),
            None => Ok(self.client(registry.insecure)),
        }
    }
}

/// Factory registry holding every built-in adapter
pub fn builtin_registry(ctx: &AdapterContext) -> Result<AdapterRegistry> {
    let registry = AdapterRegistry::new();
    native::register(&registry, ctx)?;
    harbor::register(&registry, ctx)?;
    dockerhub::register(&registry, ctx)?;
    quay::register(&registry, ctx)?;
    gcr::register(&registry, ctx)?;
    googlegar::register(&registry, ctx)?;
    ecr::register(&registry, ctx)?;
    azurecr::register(&registry, ctx)?;
    aliacr::register(&registry, ctx)?;
    aliacree::register(&registry, ctx)?;
    swr::register(&registry, ctx)?;
    tcr::register(&registry, ctx)?;
    artifactory::register(&registry, ctx)?;
    gitlab::register(&registry, ctx)?;
    helmhub::register(&registry, ctx)?;
    artifacthub::register(&registry, ctx)?;
    dtr::register(&registry, ctx)?;
    githubcr::register(&registry, ctx)?;
    Ok(registry)
}

/// Lists the artifacts of every repository with at most [`MAX_CONCURRENCY`]
/// requests in flight, applies the artifact filters and keeps the
/// repositories with something left. Output follows the input order.
pub(crate) async fn collect_resources<F, Fut>(
    registry: &Registry,
    repositories: Vec<String>,
    filters: &[Filter],
    list: F,
) -> Result<Vec<Resource>>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Artifact>>> + Send,
{
    let mut runner = LimitedConcurrentRunner::new(MAX_CONCURRENCY);
    for repository in repositories {
        let listing = list(repository.clone());
        runner.add_task(async move {
            let artifacts = listing
                .await
                .map_err(|e| e.context(format!("failed to list artifacts of {}", repository)))?;
            let artifacts = filter_artifacts(&artifacts, filters)?;
            if artifacts.is_empty() {
                return Ok(None);
            }
            let mut metadata = ResourceMetadata::new(repository);
            metadata.artifacts = artifacts;
            Ok(Some(Resource::new(ResourceType::Artifact, metadata, registry.clone())))
        });
    }
    Ok(runner.wait().await?.into_iter().flatten().collect())
}

/// Collects a whole blob stream; chart uploads need the full body
pub(crate) async fn read_all(mut stream: BlobStream) -> Result<Bytes> {
    use futures::StreamExt;
    let mut buffer = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RegistryType;

    #[test]
    fn test_builtin_registry_lists_every_type() {
        let ctx = AdapterContext::new(ReplicationConfig::default()).unwrap();
        let registry = builtin_registry(&ctx).unwrap();
        let types = registry.list_types();
        assert_eq!(types.len(), 18);
        for expected in [
            RegistryType::HARBOR,
            RegistryType::DOCKER_HUB,
            RegistryType::DOCKER_REGISTRY,
            RegistryType::HUAWEI_SWR,
            RegistryType::GOOGLE_GCR,
            RegistryType::AWS_ECR,
            RegistryType::AZURE_ACR,
            RegistryType::ALI_ACR,
            RegistryType::ALI_ACR_EE,
            RegistryType::JFROG_ARTIFACTORY,
            RegistryType::QUAY,
            RegistryType::GITLAB,
            RegistryType::HELM_HUB,
            RegistryType::ARTIFACT_HUB,
            RegistryType::DTR,
            RegistryType::TENCENT_TCR,
            RegistryType::GITHUB_GHCR,
        ] {
            assert!(types.contains(&expected), "missing {}", expected);
        }
        let mut sorted = types.clone();
        sorted.sort();
        assert_eq!(types, sorted);
    }
}
