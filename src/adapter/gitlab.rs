//! GitLab container registry
//!
//! Projects, registry repositories and tags come from the REST API at
//! `/api/v4`, authenticated with a personal access token in `PRIVATE-TOKEN`
//! and paged through `X-Next-Page`. Content moves through the registry host,
//! `registry.<gitlab host>` unless the instance already points at it.

use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter, collect_resources};
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::{HeaderModifier, HttpClient};
use crate::model::filter::name_pattern;
use crate::model::{AdapterPattern, Artifact, EndpointPattern, EndpointType, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use crate::util::is_specific_path_component;
use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

const PAGE_SIZE: u32 = 50;
const NEXT_PAGE: &str = "X-Next-Page";

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: i64,
    pub path_with_namespace: String,
    #[serde(default = "enabled")]
    pub container_registry_enabled: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryRepository {
    pub id: i64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub project_id: i64,
}

#[derive(Debug, Deserialize)]
struct RegistryTag {
    name: String,
}

/// Path of the repository inside the registry: the location without its host
pub fn repository_name(repository: &RegistryRepository) -> String {
    match repository.location.split_once('/') {
        Some((_, name)) if !name.is_empty() => name.to_string(),
        _ => repository.path.clone(),
    }
}

/// Docker registry endpoint of a GitLab instance
pub fn registry_url(gitlab: &Url) -> Result<String> {
    let host = gitlab
        .host_str()
        .ok_or_else(|| ReplicationError::invalid(format!("no host in {}", gitlab)))?;
    let host = if host.starts_with("registry.") {
        host.to_string()
    } else {
        format!("registry.{}", host)
    };
    let mut url = format!("{}://{}", gitlab.scheme(), host);
    if let Some(port) = gitlab.port() {
        url.push_str(&format!(":{}", port));
    }
    Ok(url)
}

/// Search term for the project listing: the last literal component before any wildcard
fn search_term(pattern: &str) -> Option<String> {
    let mut term = None;
    for component in pattern.split('/') {
        match is_specific_path_component(component) {
            Some(alternatives) if alternatives.len() == 1 => term = alternatives.into_iter().next(),
            _ => break,
        }
    }
    term
}

/// `/api/v4` client
pub struct GitlabClient {
    http: HttpClient,
    url: String,
}

impl GitlabClient {
    pub fn new(http: HttpClient, url: &str) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        }
    }

    /// Follows `X-Next-Page` until the header is missing or empty
    async fn get_pages<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();
        let mut page = "1".to_string();
        loop {
            let url = format!("{}/api/v4{}{}per_page={}&page={}", self.url, path, separator, PAGE_SIZE, page);
            let response = self.http.execute(self.http.get(&url)).await?;
            let next = response
                .headers()
                .get(NEXT_PAGE)
                .map(|v| v.to_str())
                .transpose()?
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let batch: Vec<T> = serde_json::from_slice(&response.bytes().await?)?;
            items.extend(batch);
            match next {
                Some(next) if next != page => page = next,
                _ => break,
            }
        }
        Ok(items)
    }

    pub async fn current_user(&self) -> Result<()> {
        self.http
            .execute(self.http.get(&format!("{}/api/v4/user", self.url)))
            .await?;
        Ok(())
    }

    pub async fn list_projects(&self, search: Option<&str>) -> Result<Vec<Project>> {
        let path = match search {
            Some(term) => format!(
                "/projects?membership=true&search_namespaces=true&search={}",
                utf8_percent_encode(term, NON_ALPHANUMERIC)
            ),
            None => "/projects?membership=true".to_string(),
        };
        self.get_pages(&path).await
    }

    pub async fn list_repositories(&self, project_id: i64) -> Result<Vec<RegistryRepository>> {
        let mut repositories: Vec<RegistryRepository> =
            self.get_pages(&format!("/projects/{}/registry/repositories", project_id)).await?;
        for repository in &mut repositories {
            repository.project_id = project_id;
        }
        Ok(repositories)
    }

    pub async fn list_tags(&self, project_id: i64, repository_id: i64) -> Result<Vec<String>> {
        let tags: Vec<RegistryTag> = self
            .get_pages(&format!(
                "/projects/{}/registry/repositories/{}/tags",
                project_id, repository_id
            ))
            .await?;
        Ok(tags.into_iter().map(|t| t.name).collect())
    }
}

pub struct GitlabAdapter {
    registry: Registry,
    client: GitlabClient,
    native: NativeAdapter,
}

impl GitlabAdapter {
    pub fn new(registry: Registry, client: GitlabClient, native: NativeAdapter) -> Self {
        Self {
            registry,
            client,
            native,
        }
    }

    async fn repositories(&self, filters: &[Filter]) -> Result<HashMap<String, RegistryRepository>> {
        let search = name_pattern(filters).and_then(search_term);
        let projects = self.client.list_projects(search.as_deref()).await?;
        let mut repositories = HashMap::new();
        for project in projects.into_iter().filter(|p| p.container_registry_enabled) {
            let listed = match self.client.list_repositories(project.id).await {
                Ok(listed) => listed,
                // registry disabled or not visible to the token
                Err(e) if e.is_not_found() || matches!(e, ReplicationError::Forbidden(_)) => {
                    tracing::debug!(project = %project.path_with_namespace, error = %e, "skipping project");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for repository in listed {
                repositories.insert(repository_name(&repository), repository);
            }
        }
        Ok(repositories)
    }
}

#[async_trait]
impl Adapter for GitlabAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::GITLAB, "GitLab container registry")
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.client.current_user().await {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::error!(url = %self.registry.url, error = %e, "gitlab API rejected the token");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for GitlabAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let repositories = self.repositories(filters).await?;
        let names = filter_repositories(filters, repositories.keys().cloned().collect(), ResourceType::Artifact)?;
        let repositories = &repositories;
        let mut resources = collect_resources(&self.registry, names, filters, |name| async move {
            let repository = repositories
                .get(&name)
                .ok_or_else(|| ReplicationError::NotFound(format!("repository {} disappeared", name)))?;
            let tags = self.client.list_tags(repository.project_id, repository.id).await?;
            Ok(tags
                .into_iter()
                .map(|tag| Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![tag]))
                .collect())
        })
        .await?;
        resources.sort_by(|a, b| a.repository().cmp(b.repository()));
        Ok(resources)
    }
}

struct GitlabFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for GitlabFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let (_, token) = registry
            .credential_pair()
            .ok_or_else(|| ReplicationError::invalid("gitlab requires a user name and an access token"))?;
        let http = HttpClient::new(self.ctx.registry_client(registry)?)
            .with_modifier(Arc::new(HeaderModifier::new("PRIVATE-TOKEN", &token)?));
        let mut docker = registry.clone();
        docker.url = registry_url(&registry.parsed_url()?)?;
        let native = NativeAdapter::new(&self.ctx, &docker)?;
        Ok(Arc::new(GitlabAdapter::new(
            registry.clone(),
            GitlabClient::new(http, &registry.url),
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
    registry.register(RegistryType::GITLAB, Arc::new(GitlabFactory { ctx: ctx.clone() }))
}
