//! Harbor adapter
//!
//! Talks to another Harbor instance (or the local one): projects are created
//! before pushing, artifacts are listed with their labels, tags are deleted
//! through the management API and Helm charts are replicated through the
//! chart repository endpoints. The API version is probed at construction.

pub mod chart;
pub mod client;

pub use client::{ApiVersion, Client};

use crate::adapter::{
    Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, ChartRegistry, Factory, NativeAdapter,
    collect_resources,
};
use crate::auth;
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::HttpClient;
use crate::model::filter::name_pattern;
use crate::model::{
    Filter, FilterStyle, FilterType, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType,
    SupportedFilter, TriggerType,
};
use crate::util::is_specific_path_component;
use async_trait::async_trait;
use client::Project;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct HarborAdapter {
    registry: Registry,
    client: Client,
    native: NativeAdapter,
}

impl HarborAdapter {
    pub fn new(registry: Registry, client: Client, native: NativeAdapter) -> Self {
        Self {
            registry,
            client,
            native,
        }
    }

    pub fn api_version(&self) -> ApiVersion {
        self.client.version()
    }

    /// Projects named by the first component of the name filter, else all of them
    async fn candidate_projects(&self, filters: &[Filter]) -> Result<Vec<Project>> {
        let first = name_pattern(filters).and_then(|p| p.split('/').next()).unwrap_or_default();
        match is_specific_path_component(first) {
            Some(names) => {
                let mut projects = Vec::new();
                for name in names {
                    projects.extend(self.client.list_projects(Some(&name)).await?);
                }
                Ok(projects)
            }
            None => self.client.list_projects(None).await,
        }
    }
}

/// `public` flag carried in the repository metadata, accepting bools and strings
fn is_public(resource: &Resource) -> bool {
    match resource.metadata.repository.metadata.get("public") {
        Some(serde_json::Value::Bool(public)) => *public,
        Some(serde_json::Value::String(public)) => public.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[async_trait]
impl Adapter for HarborAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::HARBOR, "Harbor")
            .with_resource_types(vec![ResourceType::Artifact, ResourceType::Chart])
            .with_filter(SupportedFilter {
                filter_type: FilterType::Label,
                style: FilterStyle::List,
                values: Vec::new(),
            })
            .with_filter(SupportedFilter {
                filter_type: FilterType::Resource,
                style: FilterStyle::Radio,
                values: vec![ResourceType::Artifact.to_string(), ResourceType::Chart.to_string()],
            })
            .with_triggers(vec![TriggerType::Manual, TriggerType::Scheduled, TriggerType::EventBased])
    }

    /// Creates the projects of the resources; one public resource makes the project public
    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut projects: BTreeMap<String, bool> = BTreeMap::new();
        for resource in resources {
            let name = resource.repository();
            let project = match name.split_once('/') {
                Some((project, _)) if !project.is_empty() => project,
                _ => {
                    return Err(ReplicationError::invalid(format!(
                        "repository {} has no project component",
                        name
                    )));
                }
            };
            let public = projects.entry(project.to_string()).or_default();
            *public = *public || is_public(resource);
        }
        for (project, public) in projects {
            self.client
                .create_project(&project, public)
                .await
                .map_err(|e| e.context(format!("failed to create project {}", project)))?;
            tracing::debug!(project, "project prepared");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.client.healthy().await {
            Ok(true) => Ok(HealthStatus::Healthy),
            Ok(false) => Ok(HealthStatus::Unhealthy),
            Err(e) => {
                tracing::error!(url = %self.registry.url, error = %e, "failed to check health of Harbor");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }

    fn as_chart_registry(self: Arc<Self>) -> Option<Arc<dyn ChartRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for HarborAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let mut repositories = Vec::new();
        for project in self.candidate_projects(filters).await? {
            repositories.extend(self.client.list_repositories(&project).await?);
        }
        let repositories = filter_repositories(filters, repositories, ResourceType::Artifact)?;
        collect_resources(&self.registry, repositories, filters, |repository| async move {
            self.client.list_artifacts(&repository).await
        })
        .await
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        self.client.delete_tag(repository, tag).await
    }
}

struct HarborFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for HarborFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let mut http = HttpClient::new(self.ctx.registry_client(registry)?);
        if let Some(credential) = auth::credential_modifier(registry) {
            http = http.with_modifier(credential);
        }
        let version = Client::detect_version(&http, &registry.url).await?;
        tracing::debug!(url = %registry.url, ?version, "detected Harbor API version");
        let client = Client::new(http, &registry.url, version);
        let native = NativeAdapter::new(&self.ctx, registry)?;
        Ok(Arc::new(HarborAdapter::new(registry.clone(), client, native)))
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::HARBOR, Arc::new(HarborFactory { ctx: ctx.clone() }))
}
