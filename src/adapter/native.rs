//! Adapter for any registry speaking the distribution API
//!
//! Every vendor adapter that moves OCI artifacts embeds one of these and
//! exposes it through [`ArtifactRegistry::base`].

use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, collect_resources};
use crate::auth;
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::{HttpClient, Modifier};
use crate::model::filter::name_pattern;
use crate::model::{Artifact, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use crate::registry::{self, BlobStream, Descriptor, Manifest};
use crate::util::is_specific_path;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub const ARTIFACT_TYPE_IMAGE: &str = "image";

pub struct NativeAdapter {
    registry: Registry,
    client: registry::Client,
}

impl std::fmt::Debug for NativeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeAdapter").field("url", &self.registry.url).finish()
    }
}

impl NativeAdapter {
    /// Standard chain: challenge-driven bearer auth over the registry credential
    pub fn new(ctx: &AdapterContext, registry: &Registry) -> Result<Self> {
        let client = ctx.registry_client(registry)?;
        let authorizer = auth::authorizer_for(
            registry,
            client,
            auth::credential_modifier(registry),
            ctx.config.token_cache_capacity,
        )?;
        Self::with_authorizer(ctx, registry, Some(authorizer))
    }

    /// Chain with a caller-provided authorizer, or none at all
    pub fn with_authorizer(
        ctx: &AdapterContext,
        registry: &Registry,
        authorizer: Option<Arc<dyn Modifier>>,
    ) -> Result<Self> {
        let http = HttpClient::new(ctx.registry_client(registry)?);
        let http = match authorizer {
            Some(authorizer) => http.with_modifier(authorizer),
            None => http,
        };
        Self::with_http(registry, http)
    }

    pub fn with_http(registry: &Registry, http: HttpClient) -> Result<Self> {
        let client = registry::Client::new(&registry.url, http)?;
        Ok(Self {
            registry: registry.clone(),
            client,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn client(&self) -> &registry::Client {
        &self.client
    }

    /// Healthy when `/v2/` answers through the auth chain
    pub async fn health_check(&self) -> Result<HealthStatus> {
        match self.client.ping().await {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::error!(url = %self.registry.url, error = %e, "failed to ping registry");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    /// Repositories named by the name filter, expanded directly when the
    /// pattern is wildcard-free and read from the catalog otherwise.
    /// The flag tells whether the names came from the pattern.
    pub async fn candidate_repositories(&self, filters: &[Filter]) -> Result<(Vec<String>, bool)> {
        let pattern = name_pattern(filters)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ReplicationError::invalid("a repository name filter is required"))?;
        match is_specific_path(pattern) {
            Some(paths) => Ok((paths, true)),
            None => Ok((self.client.catalog().await?, false)),
        }
    }

    pub async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let (repositories, specific) = self.candidate_repositories(filters).await?;
        let repositories = filter_repositories(filters, repositories, ResourceType::Artifact)?;
        if repositories.is_empty() {
            return Ok(Vec::new());
        }
        collect_resources(&self.registry, repositories, filters, |repository| async move {
            let tags = match self.list_tags(&repository).await {
                Ok(tags) => tags,
                // a repository named by the pattern may simply not exist
                Err(e) if specific && e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };
            Ok(tags
                .into_iter()
                .map(|tag| Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![tag]))
                .collect())
        })
        .await
    }

    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.client.repository(repository).list_tags().await
    }

    pub async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<Descriptor>> {
        self.client.repository(repository).manifest_exist(reference).await
    }

    pub async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted: &[&str],
    ) -> Result<(Manifest, String)> {
        self.client.repository(repository).pull_manifest(reference, accepted).await
    }

    pub async fn push_manifest(&self, repository: &str, reference: &str, media_type: &str, payload: Bytes) -> Result<String> {
        self.client
            .repository(repository)
            .push_manifest(reference, media_type, payload)
            .await
    }

    /// A missing manifest is not an error
    pub async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        match self.client.repository(repository).delete_manifest(reference).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(repository, reference, "manifest does not exist, nothing to delete");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool> {
        self.client.repository(repository).blob_exist(digest).await
    }

    pub async fn pull_blob(&self, repository: &str, digest: &str) -> Result<(u64, BlobStream)> {
        self.client.repository(repository).pull_blob(digest).await
    }

    pub async fn push_blob(&self, repository: &str, digest: &str, size: u64, blob: BlobStream) -> Result<()> {
        self.client.repository(repository).push_blob(digest, size, blob).await
    }

    pub async fn mount_blob(&self, source_repository: &str, digest: &str, repository: &str) -> Result<bool> {
        self.client
            .repository(repository)
            .mount_blob(digest, source_repository)
            .await
    }

    /// The distribution API has no tag deletion
    pub async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        Err(ReplicationError::Fatal(format!(
            "deleting tag {}:{} is not supported by the distribution API",
            repository, tag
        )))
    }
}

/// The `docker-registry` adapter: a bare [`NativeAdapter`]
pub struct DockerRegistryAdapter {
    native: NativeAdapter,
}

impl DockerRegistryAdapter {
    pub fn new(native: NativeAdapter) -> Self {
        Self { native }
    }
}

#[async_trait]
impl Adapter for DockerRegistryAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::DOCKER_REGISTRY, "Docker registry speaking the distribution API")
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        self.native.health_check().await
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for DockerRegistryAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        self.native.fetch_artifacts(filters).await
    }
}

struct DockerRegistryFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for DockerRegistryFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        Ok(Arc::new(DockerRegistryAdapter::new(NativeAdapter::new(&self.ctx, registry)?)))
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(
        RegistryType::DOCKER_REGISTRY,
        Arc::new(DockerRegistryFactory { ctx: ctx.clone() }),
    )
}
