//! Artifact Hub, read-only chart source
//!
//! Helm packages are searched through `/api/v1/packages/search` and resolved
//! through `/api/v1/packages/helm/{repo}/{chart}[/{version}]`. Chart names
//! are `repo/chart`.

use crate::adapter::harbor::chart::chart_resource;
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ChartRegistry, Factory};
use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::filter::{VTag, filter_repositories, filter_vtags};
use crate::http::{HttpClient, resolve};
use crate::model::filter::name_pattern;
use crate::model::{AdapterPattern, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use crate::registry::BlobStream;
use crate::util::is_specific_path_component;
use async_trait::async_trait;
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

pub const ARTIFACT_HUB_URL: &str = "https://artifacthub.io";

const PAGE_SIZE: usize = 60;
const KIND_HELM: u32 = 0;
const TOTAL_COUNT: &str = "Pagination-Total-Count";

#[derive(Debug, Default, Deserialize)]
struct RepositoryRecord {
    name: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct PackageSummary {
    name: String,
    repository: RepositoryRecord,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    packages: Vec<PackageSummary>,
}

#[derive(Debug, Deserialize)]
struct AvailableVersion {
    version: String,
}

#[derive(Debug, Deserialize)]
struct PackageDetail {
    #[serde(default)]
    available_versions: Vec<AvailableVersion>,
}

#[derive(Debug, Deserialize)]
struct VersionDetail {
    #[serde(default)]
    content_url: String,
    #[serde(default)]
    repository: RepositoryRecord,
}

fn split_chart(name: &str) -> Result<(&str, &str)> {
    match name.split_once('/') {
        Some((repo, chart)) if !repo.is_empty() && !chart.is_empty() && !chart.contains('/') => Ok((repo, chart)),
        _ => Err(ReplicationError::invalid(format!(
            "chart name must be in format <repo>/<chart>, but got: {}",
            name
        ))),
    }
}

/// Search text for the chart component of a name filter, if it is literal
fn query_term(filters: &[Filter]) -> Option<String> {
    let pattern = name_pattern(filters)?;
    let (_, chart) = pattern.split_once('/')?;
    match is_specific_path_component(chart) {
        Some(alternatives) if alternatives.len() == 1 => alternatives.into_iter().next(),
        _ => None,
    }
}

pub struct ArtifactHubAdapter {
    registry: Registry,
    http: HttpClient,
}

impl ArtifactHubAdapter {
    pub fn new(registry: Registry, http: HttpClient) -> Self {
        Self { registry, http }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.registry.base_url(), path)
    }

    async fn search(&self, term: Option<&str>) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut offset = 0;
        loop {
            let mut url = self.api(&format!(
                "/packages/search?kind={}&limit={}&offset={}",
                KIND_HELM, PAGE_SIZE, offset
            ));
            if let Some(term) = term {
                url.push_str(&format!("&ts_query_web={}", utf8_percent_encode(term, NON_ALPHANUMERIC)));
            }
            let response = self.http.execute(self.http.get(&url)).await?;
            let total = response
                .headers()
                .get(TOTAL_COUNT)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let result: SearchResult = serde_json::from_slice(&response.bytes().await?)?;
            let count = result.packages.len();
            names.extend(
                result
                    .packages
                    .into_iter()
                    .map(|p| format!("{}/{}", p.repository.name, p.name)),
            );
            offset += count;
            let done = match total {
                Some(total) => offset >= total,
                None => count < PAGE_SIZE,
            };
            if done || count == 0 {
                break;
            }
        }
        Ok(names)
    }

    async fn version_detail(&self, name: &str, version: &str) -> Result<VersionDetail> {
        let (repo, chart) = split_chart(name)?;
        self.http
            .get_json(&self.api(&format!("/packages/helm/{}/{}/{}", repo, chart, version)))
            .await
    }
}

#[async_trait]
impl Adapter for ArtifactHubAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::ARTIFACT_HUB, "Artifact Hub").with_resource_types(vec![ResourceType::Chart])
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let url = self.api(&format!("/packages/search?kind={}&limit=1", KIND_HELM));
        match self.http.execute(self.http.get(&url)).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::error!(url = %self.registry.url, error = %e, "artifact hub is unreachable");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_chart_registry(self: Arc<Self>) -> Option<Arc<dyn ChartRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ChartRegistry for ArtifactHubAdapter {
    /// Download URLs are resolved per version at download time
    async fn fetch_charts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let names = self.search(query_term(filters).as_deref()).await?;
        let names = filter_repositories(filters, names, ResourceType::Chart)?;
        let mut resources = Vec::new();
        for name in names {
            let (repo, chart) = split_chart(&name)?;
            let detail: PackageDetail = self
                .http
                .get_json(&self.api(&format!("/packages/helm/{}/{}", repo, chart)))
                .await?;
            let vtags = detail
                .available_versions
                .into_iter()
                .map(|v| VTag::new(v.version, ResourceType::Chart))
                .collect();
            let vtags = filter_vtags(filters, vtags)?;
            if vtags.is_empty() {
                continue;
            }
            resources.push(chart_resource(
                &self.registry,
                &name,
                vtags.into_iter().map(|vtag| (vtag, None)).collect(),
            ));
        }
        Ok(resources)
    }

    async fn chart_exist(&self, name: &str, version: &str) -> Result<bool> {
        let (repo, chart) = split_chart(name)?;
        let response = self
            .http
            .send(self.http.get(&self.api(&format!("/packages/helm/{}/{}/{}", repo, chart, version))))
            .await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(HttpErrorHandler::from_response(response).await),
        }
    }

    async fn download_chart(&self, name: &str, version: &str, content_url: Option<&str>) -> Result<BlobStream> {
        let url = match content_url.filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => {
                let detail = self.version_detail(name, version).await?;
                if detail.content_url.is_empty() {
                    return Err(ReplicationError::NotFound(format!(
                        "no download URL for chart {}:{}",
                        name, version
                    )));
                }
                match Url::parse(&detail.content_url) {
                    Ok(url) => url.to_string(),
                    Err(_) => {
                        let base = Url::parse(&format!("{}/", detail.repository.url.trim_end_matches('/')))?;
                        resolve(&base, &detail.content_url)?.to_string()
                    }
                }
            }
        };
        let response = self.http.execute(self.http.get(&url)).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ReplicationError::from))
            .boxed())
    }

    async fn upload_chart(&self, _name: &str, _version: &str, _chart: BlobStream) -> Result<()> {
        Err(ReplicationError::Fatal("artifact hub does not accept chart uploads".to_string()))
    }

    async fn delete_chart(&self, _name: &str, _version: &str) -> Result<()> {
        Err(ReplicationError::Fatal("artifact hub does not support chart deletion".to_string()))
    }
}

struct ArtifactHubFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for ArtifactHubFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let http = HttpClient::new(self.ctx.client(registry.insecure));
        Ok(Arc::new(ArtifactHubAdapter::new(registry.clone(), http)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(vec![Endpoint::new("artifacthub.io", ARTIFACT_HUB_URL)])
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::ARTIFACT_HUB, Arc::new(ArtifactHubFactory { ctx: ctx.clone() }))
}
