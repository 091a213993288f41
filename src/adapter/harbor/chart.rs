//! Chart museum endpoints of a Harbor instance
//!
//! Charts live under `/api/chartrepo/{project}/charts` on every API
//! version. Chart names are `project/chart`.

use crate::adapter::harbor::HarborAdapter;
use crate::adapter::harbor::client::split_project;
use crate::adapter::{ChartRegistry, read_all};
use crate::error::{ReplicationError, Result};
use crate::filter::{VTag, filter_repositories, filter_vtags};
use crate::http::resolve;
use crate::model::{Artifact, Filter, Resource, ResourceMetadata, ResourceType};
use crate::registry::BlobStream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Key of the `version -> download URL` map in a chart resource's extended info
pub const CONTENT_URLS: &str = "content_urls";
pub const ARTIFACT_TYPE_CHART: &str = "chart";

#[derive(Debug, Deserialize)]
struct ChartRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChartVersion {
    version: String,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    labels: Option<Vec<Label>>,
}

fn split_chart(name: &str) -> Result<(&str, &str)> {
    match split_project(name) {
        (project, chart) if !project.is_empty() && !chart.is_empty() && !chart.contains('/') => Ok((project, chart)),
        _ => Err(ReplicationError::invalid(format!(
            "chart name must be in format <project>/<chart>, but got: {}",
            name
        ))),
    }
}

/// Builds the chart resource, recording where each version downloads from
pub(crate) fn chart_resource(
    registry: &crate::model::Registry,
    name: &str,
    versions: Vec<(VTag, Option<String>)>,
) -> Resource {
    let mut metadata = ResourceMetadata::new(name);
    let mut urls = serde_json::Map::new();
    for (vtag, url) in versions {
        if let Some(url) = url {
            urls.insert(vtag.name.clone(), serde_json::Value::String(url));
        }
        metadata
            .artifacts
            .push(Artifact::tagged(ARTIFACT_TYPE_CHART, vec![vtag.name]).with_labels(vtag.labels));
    }
    let mut resource = Resource::new(ResourceType::Chart, metadata, registry.clone());
    if !urls.is_empty() {
        resource
            .extended_info
            .insert(CONTENT_URLS.to_string(), serde_json::Value::Object(urls));
    }
    resource
}

/// Download URL recorded for the version, if any
pub fn content_url<'a>(resource: &'a Resource, version: &str) -> Option<&'a str> {
    resource.extended_info.get(CONTENT_URLS)?.get(version)?.as_str()
}

impl HarborAdapter {
    fn chart_api(&self, project: &str, suffix: &str) -> String {
        format!("{}/api/chartrepo/{}/charts{}", self.client.url(), project, suffix)
    }

    async fn chart_versions(&self, project: &str, chart: &str) -> Result<Vec<ChartVersion>> {
        self.client
            .http()
            .get_json(&self.chart_api(project, &format!("/{}", chart)))
            .await
    }

    /// Absolute URLs are used as is; relative ones resolve against the project's chart repo
    fn chart_download_url(&self, project: &str, url: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        let base = Url::parse(&format!("{}/chartrepo/{}/", self.client.url(), project))?;
        resolve(&base, url)
    }
}

#[async_trait]
impl ChartRegistry for HarborAdapter {
    async fn fetch_charts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let mut names = Vec::new();
        for project in self.candidate_projects(filters).await? {
            let charts: Vec<ChartRecord> = self.client.http().get_json(&self.chart_api(&project.name, "")).await?;
            names.extend(charts.into_iter().map(|c| format!("{}/{}", project.name, c.name)));
        }
        let names = filter_repositories(filters, names, ResourceType::Chart)?;

        let mut resources = Vec::new();
        for name in names {
            let (project, chart) = split_chart(&name)?;
            let versions = self.chart_versions(project, chart).await?;
            let mut urls: HashMap<String, Option<String>> = HashMap::new();
            let mut vtags = Vec::with_capacity(versions.len());
            for version in versions {
                let labels = version.labels.unwrap_or_default().into_iter().map(|l| l.name).collect();
                urls.insert(version.version.clone(), version.urls.into_iter().next());
                vtags.push(VTag::new(version.version, ResourceType::Chart).with_labels(labels));
            }
            let vtags = filter_vtags(filters, vtags)?;
            if vtags.is_empty() {
                continue;
            }
            let versions = vtags
                .into_iter()
                .map(|vtag| {
                    let url = urls.remove(&vtag.name).flatten();
                    (vtag, url)
                })
                .collect();
            resources.push(chart_resource(&self.registry, &name, versions));
        }
        Ok(resources)
    }

    async fn chart_exist(&self, name: &str, version: &str) -> Result<bool> {
        let (project, chart) = split_chart(name)?;
        let http = self.client.http();
        let response = http
            .send(http.get(&self.chart_api(project, &format!("/{}/{}", chart, version))))
            .await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(crate::error::handlers::HttpErrorHandler::from_response(response).await),
        }
    }

    async fn download_chart(&self, name: &str, version: &str, content_url: Option<&str>) -> Result<BlobStream> {
        let (project, chart) = split_chart(name)?;
        let url = match content_url.filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => self
                .chart_versions(project, chart)
                .await?
                .into_iter()
                .find(|v| v.version == version)
                .and_then(|v| v.urls.into_iter().next())
                .ok_or_else(|| ReplicationError::NotFound(format!("no download URL for chart {}:{}", name, version)))?,
        };
        let url = self.chart_download_url(project, &url)?;
        let http = self.client.http();
        let response = http.execute(http.get(url.as_str())).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ReplicationError::from))
            .boxed())
    }

    async fn upload_chart(&self, name: &str, version: &str, chart: BlobStream) -> Result<()> {
        let (project, chart_name) = split_chart(name)?;
        let content = read_all(chart).await?;
        let part = Part::bytes(content.to_vec()).file_name(format!("{}-{}.tgz", chart_name, version));
        let form = Form::new().part("chart", part);
        let http = self.client.http();
        http.execute(http.request(Method::POST, &self.chart_api(project, "")).multipart(form))
            .await?;
        Ok(())
    }

    async fn delete_chart(&self, name: &str, version: &str) -> Result<()> {
        let (project, chart) = split_chart(name)?;
        let http = self.client.http();
        http.execute(http.request(Method::DELETE, &self.chart_api(project, &format!("/{}/{}", chart, version))))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chart() {
        assert_eq!(split_chart("library/nginx").unwrap(), ("library", "nginx"));
        assert!(split_chart("nginx").is_err());
        assert!(split_chart("a/b/c").is_err());
    }

    #[test]
    fn test_content_url_lookup() {
        let registry = crate::model::Registry::new("h", crate::model::RegistryType::HARBOR, "https://h");
        let resource = chart_resource(
            &registry,
            "library/nginx",
            vec![
                (VTag::new("0.1.0", ResourceType::Chart), Some("charts/nginx-0.1.0.tgz".into())),
                (VTag::new("0.2.0", ResourceType::Chart), None),
            ],
        );
        assert_eq!(content_url(&resource, "0.1.0"), Some("charts/nginx-0.1.0.tgz"));
        assert_eq!(content_url(&resource, "0.2.0"), None);
        assert_eq!(resource.metadata.references(), vec!["0.1.0", "0.2.0"]);
    }
}
