//! Helm Hub, read-only chart source
//!
//! Charts come from the chart service at `/api/chartsvc/v1/charts`; every
//! version record carries the archive URL, absolute or relative to the
//! chart repository.

use crate::adapter::harbor::chart::chart_resource;
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ChartRegistry, Factory};
use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::filter::{VTag, filter_repositories, filter_vtags};
use crate::http::{HttpClient, resolve};
use crate::model::{AdapterPattern, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use crate::registry::BlobStream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

pub const HELM_HUB_URL: &str = "https://hub.helm.sh";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ChartRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VersionAttributes {
    version: String,
    #[serde(default)]
    urls: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoRecord {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChartData {
    #[serde(default)]
    repo: RepoRecord,
}

#[derive(Debug, Default, Deserialize)]
struct ChartRelationship {
    #[serde(default)]
    data: ChartData,
}

#[derive(Debug, Default, Deserialize)]
struct Relationships {
    #[serde(default)]
    chart: ChartRelationship,
}

#[derive(Debug, Deserialize)]
struct ChartVersion {
    attributes: VersionAttributes,
    #[serde(default)]
    relationships: Relationships,
}

impl ChartVersion {
    /// First archive URL, resolved against the chart repository when relative
    fn download_url(&self) -> Result<Option<String>> {
        let Some(url) = self.attributes.urls.first() else {
            return Ok(None);
        };
        if Url::parse(url).is_ok() {
            return Ok(Some(url.clone()));
        }
        let repo = &self.relationships.chart.data.repo.url;
        if repo.is_empty() {
            return Err(ReplicationError::protocol(format!("relative chart URL {} without a repository", url)));
        }
        let base = Url::parse(&format!("{}/", repo.trim_end_matches('/')))?;
        Ok(Some(resolve(&base, url)?.to_string()))
    }
}

pub struct HelmHubAdapter {
    registry: Registry,
    http: HttpClient,
}

impl HelmHubAdapter {
    pub fn new(registry: Registry, http: HttpClient) -> Self {
        Self { registry, http }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/chartsvc/v1/charts{}", self.registry.base_url(), path)
    }

    async fn versions(&self, name: &str) -> Result<Vec<ChartVersion>> {
        let envelope: Envelope<Vec<ChartVersion>> = self.http.get_json(&self.api(&format!("/{}/versions", name))).await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl Adapter for HelmHubAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::HELM_HUB, "Helm Hub").with_resource_types(vec![ResourceType::Chart])
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.http.execute(self.http.get(&self.registry.base_url())).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::error!(url = %self.registry.url, error = %e, "helm hub is unreachable");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_chart_registry(self: Arc<Self>) -> Option<Arc<dyn ChartRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ChartRegistry for HelmHubAdapter {
    async fn fetch_charts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let charts: Envelope<Vec<ChartRecord>> = self.http.get_json(&self.api("")).await?;
        let names = filter_repositories(
            filters,
            charts.data.into_iter().map(|c| c.id).collect(),
            ResourceType::Chart,
        )?;
        let mut resources = Vec::new();
        for name in names {
            let versions = self.versions(&name).await?;
            let vtags = versions
                .iter()
                .map(|v| VTag::new(v.attributes.version.clone(), ResourceType::Chart))
                .collect();
            let vtags = filter_vtags(filters, vtags)?;
            if vtags.is_empty() {
                continue;
            }
            let mut kept = Vec::with_capacity(vtags.len());
            for vtag in vtags {
                let url = match versions.iter().find(|v| v.attributes.version == vtag.name) {
                    Some(version) => version.download_url()?,
                    None => None,
                };
                kept.push((vtag, url));
            }
            resources.push(chart_resource(&self.registry, &name, kept));
        }
        Ok(resources)
    }

    async fn chart_exist(&self, name: &str, version: &str) -> Result<bool> {
        let response = self
            .http
            .send(self.http.get(&self.api(&format!("/{}/versions/{}", name, version))))
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
                let envelope: Envelope<ChartVersion> = self
                    .http
                    .get_json(&self.api(&format!("/{}/versions/{}", name, version)))
                    .await?;
                envelope
                    .data
                    .download_url()?
                    .ok_or_else(|| ReplicationError::NotFound(format!("no download URL for chart {}:{}", name, version)))?
            }
        };
        let response = self.http.execute(self.http.get(&url)).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ReplicationError::from))
            .boxed())
    }

    async fn upload_chart(&self, _name: &str, _version: &str, _chart: BlobStream) -> Result<()> {
        Err(ReplicationError::Fatal("helm hub does not accept chart uploads".to_string()))
    }

    async fn delete_chart(&self, _name: &str, _version: &str) -> Result<()> {
        Err(ReplicationError::Fatal("helm hub does not support chart deletion".to_string()))
    }
}

struct HelmHubFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for HelmHubFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let http = HttpClient::new(self.ctx.client(registry.insecure));
        Ok(Arc::new(HelmHubAdapter::new(registry.clone(), http)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(vec![Endpoint::new("hub.helm.sh", HELM_HUB_URL)])
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::HELM_HUB, Arc::new(HelmHubFactory { ctx: ctx.clone() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::harbor::chart::content_url;
    use crate::adapter::read_all;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(url: &str) -> HelmHubAdapter {
        HelmHubAdapter::new(
            Registry::new("hub", RegistryType::HELM_HUB, url),
            HttpClient::new(reqwest::Client::new()),
        )
    }

    #[tokio::test]
    async fn test_fetch_records_resolved_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chartsvc/v1/charts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "stable/nginx"}, {"id": "incubator/x"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/chartsvc/v1/charts/stable/nginx/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
                {
                    "attributes": {"version": "1.0.0", "urls": ["nginx-1.0.0.tgz"]},
                    "relationships": {"chart": {"data": {"repo": {"url": "https://charts.example.com/stable"}}}}
                },
                {"attributes": {"version": "2.0.0", "urls": ["https://cdn.example.com/nginx-2.0.0.tgz"]}}
            ]})))
            .mount(&server)
            .await;

        let resources = adapter(&server.uri())
            .fetch_charts(&[Filter::name("stable/*")])
            .await
            .unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(
            content_url(&resources[0], "1.0.0"),
            Some("https://charts.example.com/stable/nginx-1.0.0.tgz")
        );
        assert_eq!(content_url(&resources[0], "2.0.0"), Some("https://cdn.example.com/nginx-2.0.0.tgz"));
    }

    #[tokio::test]
    async fn test_download_uses_content_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/nginx-1.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"chart".to_vec()))
            .mount(&server)
            .await;
        let url = format!("{}/files/nginx-1.0.0.tgz", server.uri());
        let stream = adapter(&server.uri())
            .download_chart("stable/nginx", "1.0.0", Some(&url))
            .await
            .unwrap();
        assert_eq!(read_all(stream).await.unwrap().as_ref(), b"chart");
    }

    #[tokio::test]
    async fn test_writes_are_fatal() {
        let adapter = adapter("http://127.0.0.1:1");
        assert!(matches!(
            adapter.delete_chart("stable/nginx", "1.0.0").await,
            Err(ReplicationError::Fatal(_))
        ));
        let empty: BlobStream = futures::stream::empty().boxed();
        assert!(matches!(
            adapter.upload_chart("stable/nginx", "1.0.0", empty).await,
            Err(ReplicationError::Fatal(_))
        ));
    }
}
