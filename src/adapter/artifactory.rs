//! JFrog Artifactory
//!
//! Docker repositories are served on the standard `/v2/{key}/{image}` paths,
//! the repository key being the first path component. Local docker
//! repositories are listed and created through `/artifactory/api`.

use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter, collect_resources};
use crate::auth::BasicAuthCredential;
use crate::error::handlers::ignore_conflict;
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::HttpClient;
use crate::model::filter::name_pattern;
use crate::model::{AdapterPattern, Artifact, EndpointPattern, EndpointType, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use crate::util::is_specific_path_component;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Serialize)]
struct NewRepository<'a> {
    key: &'a str,
    rclass: &'a str,
    #[serde(rename = "packageType")]
    package_type: &'a str,
}

/// `/artifactory/api` client
pub struct ArtifactoryClient {
    http: HttpClient,
    url: String,
}

impl ArtifactoryClient {
    pub fn new(http: HttpClient, url: &str) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/artifactory/api{}", self.url, path)
    }

    /// Keys of the local docker repositories
    pub async fn list_docker_repositories(&self) -> Result<Vec<String>> {
        let records: Vec<RepositoryRecord> = self
            .http
            .get_json(&self.api("/repositories?type=local&packageType=docker"))
            .await?;
        Ok(records.into_iter().map(|r| r.key).collect())
    }

    pub async fn create_docker_repository(&self, key: &str) -> Result<()> {
        let body = NewRepository {
            key,
            rclass: "local",
            package_type: "docker",
        };
        let builder = self
            .http
            .request(Method::PUT, &self.api(&format!("/repositories/{}", key)))
            .json(&body);
        ignore_conflict(self.http.execute(builder).await.map(|_| ()))
    }

    /// Image names inside one docker repository, without the key
    pub async fn list_images(&self, key: &str) -> Result<Vec<String>> {
        let catalog: Catalog = self
            .http
            .get_json(&self.api(&format!("/docker/{}/v2/_catalog", key)))
            .await?;
        Ok(catalog.repositories)
    }
}

pub struct ArtifactoryAdapter {
    registry: Registry,
    client: ArtifactoryClient,
    native: NativeAdapter,
}

impl ArtifactoryAdapter {
    pub fn new(registry: Registry, client: ArtifactoryClient, native: NativeAdapter) -> Self {
        Self {
            registry,
            client,
            native,
        }
    }

    /// Every `key/image` name, narrowed to the keys a name filter can match
    async fn candidate_repositories(&self, filters: &[Filter]) -> Result<Vec<String>> {
        let keys = self.client.list_docker_repositories().await?;
        let wanted = name_pattern(filters)
            .and_then(|pattern| pattern.split('/').next())
            .and_then(is_specific_path_component);
        let mut repositories = Vec::new();
        for key in keys {
            if let Some(wanted) = &wanted {
                if !wanted.contains(&key) {
                    continue;
                }
            }
            let images = self
                .client
                .list_images(&key)
                .await
                .map_err(|e| e.context(format!("failed to list images of {}", key)))?;
            repositories.extend(images.into_iter().map(|image| format!("{}/{}", key, image)));
        }
        Ok(repositories)
    }
}

#[async_trait]
impl Adapter for ArtifactoryAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::JFROG_ARTIFACTORY, "JFrog Artifactory")
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut keys = BTreeSet::new();
        for resource in resources {
            match resource.repository().split_once('/') {
                Some((key, _)) if !key.is_empty() => keys.insert(key),
                _ => {
                    return Err(ReplicationError::invalid(format!(
                        "artifactory repository must be in format <key>/<image>, but got: {}",
                        resource.repository()
                    )));
                }
            };
        }
        let existing: BTreeSet<String> = self.client.list_docker_repositories().await?.into_iter().collect();
        for key in keys {
            if existing.contains(key) {
                tracing::debug!(key, "docker repository already exists in artifactory");
                continue;
            }
            self.client
                .create_docker_repository(key)
                .await
                .map_err(|e| e.context(format!("create docker repository {}", key)))?;
            tracing::info!(key, "docker repository created in artifactory");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        self.native.health_check().await
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for ArtifactoryAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let repositories = filter_repositories(filters, self.candidate_repositories(filters).await?, ResourceType::Artifact)?;
        collect_resources(&self.registry, repositories, filters, |repository| async move {
            let tags = self.native.list_tags(&repository).await?;
            Ok(tags
                .into_iter()
                .map(|tag| Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![tag]))
                .collect())
        })
        .await
    }
}

struct ArtifactoryFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for ArtifactoryFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let mut http = HttpClient::new(self.ctx.registry_client(registry)?);
        if let Some((username, password)) = registry.credential_pair() {
            http = http.with_modifier(Arc::new(BasicAuthCredential::new(username, password)));
        }
        let native = NativeAdapter::new(&self.ctx, registry)?;
        Ok(Arc::new(ArtifactoryAdapter::new(
            registry.clone(),
            ArtifactoryClient::new(http, &registry.url),
            native,
        )))
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
    registry.register(
        RegistryType::JFROG_ARTIFACTORY,
        Arc::new(ArtifactoryFactory { ctx: ctx.clone() }),
    )
}
