//! Harbor management API
//!
//! v2 instances serve `/api/v2.0`, older ones `/api`. The two differ in
//! path shapes and in how tags and labels are listed; [`ApiVersion`]
//! selects the variant.

use crate::error::handlers::{HttpErrorHandler, ignore_conflict};
use crate::error::Result;
use crate::http::HttpClient;
use crate::model::Artifact;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const PAGE_SIZE: u32 = 100;

/// Unreserved characters stay as they are
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub fn base_path(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "/api",
            ApiVersion::V2 => "/api/v2.0",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub project_id: i64,
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Serialize)]
struct ProjectRequest<'a> {
    project_name: &'a str,
    metadata: HashMap<&'static str, &'static str>,
}

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactRecord {
    #[serde(rename = "type", default)]
    artifact_type: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    tags: Option<Vec<Named>>,
    #[serde(default)]
    labels: Option<Vec<Named>>,
}

#[derive(Debug, Deserialize)]
struct TagRecord {
    name: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    labels: Option<Vec<Named>>,
}

#[derive(Debug, Deserialize)]
struct HealthRecord {
    status: String,
}

fn names(records: Option<Vec<Named>>) -> Vec<String> {
    records.unwrap_or_default().into_iter().map(|n| n.name).collect()
}

/// Repository path segments are escaped twice so `/` survives routing
pub fn escape_repository(name: &str) -> String {
    let once = utf8_percent_encode(name, SEGMENT).to_string();
    utf8_percent_encode(&once, SEGMENT).to_string()
}

/// Splits `project/rest` into the project and the repository inside it
pub fn split_project(repository: &str) -> (&str, &str) {
    repository.split_once('/').unwrap_or(("", repository))
}

pub struct Client {
    http: HttpClient,
    url: String,
    version: ApiVersion,
}

impl Client {
    pub fn new(http: HttpClient, url: &str, version: ApiVersion) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            version,
        }
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}{}", self.url, self.version.base_path(), path)
    }

    /// Probes `/api/version`; a missing or empty answer means a v1 instance
    pub async fn detect_version(http: &HttpClient, url: &str) -> Result<ApiVersion> {
        #[derive(Deserialize)]
        struct Version {
            #[serde(default)]
            version: String,
        }
        let url = format!("{}/api/version", url.trim_end_matches('/'));
        let response = http.send(http.get(&url)).await?;
        if response.status().as_u16() == 404 {
            return Ok(ApiVersion::V1);
        }
        let response = HttpErrorHandler::check(response).await?;
        let version: Version = serde_json::from_slice(&response.bytes().await?)?;
        Ok(if version.version.is_empty() {
            ApiVersion::V1
        } else {
            ApiVersion::V2
        })
    }

    pub async fn healthy(&self) -> Result<bool> {
        let health: HealthRecord = self.http.get_json(&self.api("/health")).await?;
        Ok(health.status == "healthy")
    }

    pub async fn list_projects(&self, name: Option<&str>) -> Result<Vec<Project>> {
        let mut url = format!("{}?page=1&page_size={}", self.api("/projects"), PAGE_SIZE);
        if let Some(name) = name {
            url.push_str(&format!("&name={}", utf8_percent_encode(name, SEGMENT)));
        }
        let projects = self
            .http
            .paginate(&url, |body| Ok(serde_json::from_slice::<Option<Vec<Project>>>(body)?.unwrap_or_default()))
            .await?;
        // the name query is a fuzzy match
        Ok(match name {
            Some(name) => projects.into_iter().filter(|p| p.name == name).collect(),
            None => projects,
        })
    }

    /// Creates a project; an existing one counts as success
    pub async fn create_project(&self, name: &str, public: bool) -> Result<()> {
        let mut metadata = HashMap::new();
        metadata.insert("public", if public { "true" } else { "false" });
        let builder = self
            .http
            .request(Method::POST, &self.api("/projects"))
            .json(&ProjectRequest {
                project_name: name,
                metadata,
            });
        ignore_conflict(self.http.execute(builder).await.map(|_| ()))
    }

    pub async fn list_repositories(&self, project: &Project) -> Result<Vec<String>> {
        let url = match self.version {
            ApiVersion::V2 => format!(
                "{}?page=1&page_size={}",
                self.api(&format!("/projects/{}/repositories", project.name)),
                PAGE_SIZE
            ),
            ApiVersion::V1 => format!(
                "{}?project_id={}&page=1&page_size={}",
                self.api("/repositories"),
                project.project_id,
                PAGE_SIZE
            ),
        };
        let repositories = self
            .http
            .paginate(&url, |body| {
                Ok(serde_json::from_slice::<Option<Vec<RepositoryRecord>>>(body)?.unwrap_or_default())
            })
            .await?;
        Ok(repositories.into_iter().map(|r| r.name).collect())
    }

    /// Artifacts with their tags and labels
    pub async fn list_artifacts(&self, repository: &str) -> Result<Vec<Artifact>> {
        match self.version {
            ApiVersion::V2 => {
                let (project, name) = split_project(repository);
                let url = format!(
                    "{}?with_tag=true&with_label=true&page=1&page_size={}",
                    self.api(&format!(
                        "/projects/{}/repositories/{}/artifacts",
                        project,
                        escape_repository(name)
                    )),
                    PAGE_SIZE
                );
                let records = self
                    .http
                    .paginate(&url, |body| {
                        Ok(serde_json::from_slice::<Option<Vec<ArtifactRecord>>>(body)?.unwrap_or_default())
                    })
                    .await?;
                Ok(records
                    .into_iter()
                    .map(|r| Artifact {
                        artifact_type: r.artifact_type.to_lowercase(),
                        digest: Some(r.digest).filter(|d| !d.is_empty()),
                        tags: names(r.tags),
                        labels: names(r.labels),
                    })
                    .collect())
            }
            ApiVersion::V1 => {
                let url = format!("{}?detail=true", self.api(&format!("/repositories/{}/tags", repository)));
                let tags: Vec<TagRecord> = self.http.get_json(&url).await?;
                Ok(tags
                    .into_iter()
                    .map(|t| Artifact {
                        artifact_type: "image".to_string(),
                        digest: Some(t.digest).filter(|d| !d.is_empty()),
                        tags: vec![t.name],
                        labels: names(t.labels),
                    })
                    .collect())
            }
        }
    }

    pub async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        let url = match self.version {
            ApiVersion::V2 => {
                let (project, name) = split_project(repository);
                self.api(&format!(
                    "/projects/{}/repositories/{}/artifacts/{}/tags/{}",
                    project,
                    escape_repository(name),
                    tag,
                    tag
                ))
            }
            ApiVersion::V1 => self.api(&format!("/repositories/{}/tags/{}", repository, tag)),
        };
        self.http.execute(self.http.request(Method::DELETE, &url)).await?;
        Ok(())
    }
}
