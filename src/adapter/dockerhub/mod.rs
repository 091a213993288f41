//! Docker Hub adapter
//!
//! Listing and namespace management use the Hub REST API at
//! `hub.docker.com`; content moves through the registry at
//! `registry-1.docker.io`. Repositories are always `namespace/name`.

pub mod client;

pub use client::Client;

use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter, collect_resources};
use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::HttpClient;
use crate::model::filter::name_pattern;
use crate::model::{
    AdapterPattern, Artifact, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource,
    ResourceType,
};
use crate::util::is_specific_path_component;
use async_trait::async_trait;
use client::{NamespacesResponse, NewOrgRequest, Page, Repo, Tag};
use reqwest::Method;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const HUB_URL: &str = "https://hub.docker.com";
pub const REGISTRY_URL: &str = "https://registry-1.docker.io";
const PAGE_SIZE: u32 = 100;

pub struct DockerHubAdapter {
    registry: Registry,
    client: Client,
    native: NativeAdapter,
}

impl DockerHubAdapter {
    pub fn new(registry: Registry, client: Client, native: NativeAdapter) -> Self {
        Self {
            registry,
            client,
            native,
        }
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let response = self
            .client
            .limit_aware_do(Method::GET, &client::namespace_path(namespace), None)
            .await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(crate::error::handlers::HttpErrorHandler::from_response(response).await),
        }
    }

    /// Creates the organization unless it already exists
    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespace_exists(namespace).await? {
            tracing::info!(namespace, "namespace already exists in Docker Hub, skip it");
            return Ok(());
        }
        let request = serde_json::to_value(NewOrgRequest {
            name: namespace.to_string(),
            full_name: namespace.to_string(),
            company: namespace.to_string(),
        })?;
        self.client
            .execute(Method::POST, client::CREATE_NAMESPACE_PATH, Some(&request))
            .await
            .map_err(|e| e.context(format!("create namespace '{}' in Docker Hub", namespace)))?;
        tracing::debug!(namespace, "namespace created");
        Ok(())
    }

    /// Namespaces named by the first pattern component, else every namespace of the user
    async fn candidate_namespaces(&self, pattern: &str) -> Result<Vec<String>> {
        if let Some(first) = pattern.split('/').next().filter(|c| !c.is_empty()) {
            if let Some(namespaces) = is_specific_path_component(first) {
                tracing::debug!(?namespaces, pattern, "parsed namespaces from pattern");
                return Ok(namespaces);
            }
        }
        let response: NamespacesResponse = self.client.get_json(client::LIST_NAMESPACES_PATH).await?;
        Ok(response.namespaces)
    }

    async fn list_repositories(&self, namespace: &str) -> Result<Vec<Repo>> {
        let mut repos = Vec::new();
        let mut page = 1;
        loop {
            let result: Page<Repo> = self
                .client
                .get_json(&client::list_repos_path(namespace, page, PAGE_SIZE))
                .await
                .map_err(|e| e.context(format!("get repos for namespace '{}' from Docker Hub", namespace)))?;
            let last = result.is_last();
            repos.extend(result.results);
            if last {
                break;
            }
            page += 1;
        }
        tracing::debug!(namespace, count = repos.len(), "listed repositories");
        Ok(repos)
    }

    async fn list_hub_tags(&self, namespace: &str, repository: &str) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut page = 1;
        loop {
            let result: Page<Tag> = self
                .client
                .get_json(&client::list_tags_path(namespace, repository, page, PAGE_SIZE))
                .await?;
            let last = result.is_last();
            tags.extend(result.results.into_iter().map(|t| t.name));
            if last {
                break;
            }
            page += 1;
        }
        Ok(tags)
    }

    async fn delete_by_tag(&self, repository: &str, tag: &str) -> Result<()> {
        let (namespace, name) = split_repository(repository)?;
        self.client
            .execute(Method::DELETE, &client::delete_tag_path(namespace, name, tag), None)
            .await?;
        Ok(())
    }
}

fn split_repository(repository: &str) -> Result<(&str, &str)> {
    match repository.split('/').collect::<Vec<_>>().as_slice() {
        [namespace, name] if !namespace.is_empty() && !name.is_empty() => Ok((namespace, name)),
        _ => Err(ReplicationError::invalid(format!(
            "dockerhub only support repo in format <namespace>/<name>, but got: {}",
            repository
        ))),
    }
}

#[async_trait]
impl Adapter for DockerHubAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::DOCKER_HUB, "Docker Hub").with_path_components("2")
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut namespaces = BTreeSet::new();
        for resource in resources {
            let name = resource.repository();
            if name.is_empty() {
                return Err(ReplicationError::invalid("the name of the namespace cannot be empty"));
            }
            namespaces.insert(name.split('/').next().unwrap_or(name).to_string());
        }
        for namespace in namespaces {
            self.create_namespace(&namespace).await?;
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
impl ArtifactRegistry for DockerHubAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let pattern = name_pattern(filters).unwrap_or_default();
        let mut names = Vec::new();
        for namespace in self.candidate_namespaces(pattern).await? {
            for repo in self.list_repositories(&namespace).await? {
                names.push(format!("{}/{}", repo.namespace, repo.name));
            }
        }
        let names = filter_repositories(filters, names, ResourceType::Artifact)?;
        collect_resources(&self.registry, names, filters, |repository| async move {
            let (namespace, name) = split_repository(&repository)?;
            let tags = self.list_hub_tags(namespace, name).await?;
            Ok(tags
                .into_iter()
                .map(|tag| Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![tag]))
                .collect())
        })
        .await
    }

    /// Hub deletes by tag only
    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        self.delete_by_tag(repository, reference).await
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        self.delete_by_tag(repository, tag).await
    }
}

struct DockerHubFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for DockerHubFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let client = Client::new(
            HttpClient::new(self.ctx.client(registry.insecure)),
            &registry.url,
            registry.credential_pair(),
        );
        let mut content = registry.clone();
        content.url = REGISTRY_URL.to_string();
        let native = NativeAdapter::new(&self.ctx, &content)?;
        Ok(Arc::new(DockerHubAdapter::new(registry.clone(), client, native)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(vec![Endpoint::new("hub.docker.com", HUB_URL)])
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::DOCKER_HUB, Arc::new(DockerHubFactory { ctx: ctx.clone() }))
}
