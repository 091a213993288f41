//! Docker Trusted Registry
//!
//! Accounts (namespaces) and repositories must exist before a push; both are
//! created through `/api/v0` with Basic credentials. Listing pages through
//! `/api/v0/repositories` with `pageStart` and `X-Next-Page-Start`.

use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter, collect_resources};
use crate::auth::BasicAuthCredential;
use crate::error::handlers::{HttpErrorHandler, ignore_conflict};
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::HttpClient;
use crate::model::{AdapterPattern, Artifact, EndpointPattern, EndpointType, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

const PAGE_SIZE: u32 = 100;
const NEXT_PAGE_START: &str = "X-Next-Page-Start";

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    namespace: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryPage {
    #[serde(default)]
    repositories: Vec<RepositoryRecord>,
}

#[derive(Serialize)]
struct NewAccount<'a> {
    name: &'a str,
    #[serde(rename = "isOrg")]
    is_org: bool,
}

#[derive(Serialize)]
struct NewRepository<'a> {
    name: &'a str,
    visibility: &'a str,
}

/// `/api/v0` client
pub struct DtrClient {
    http: HttpClient,
    url: String,
}

impl DtrClient {
    pub fn new(http: HttpClient, url: &str) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v0{}", self.url, path)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let response = self.http.send(self.http.get(&self.api(path))).await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(HttpErrorHandler::from_response(response).await),
        }
    }

    pub async fn account_exists(&self, namespace: &str) -> Result<bool> {
        self.exists(&format!("/accounts/{}", namespace)).await
    }

    pub async fn create_account(&self, namespace: &str) -> Result<()> {
        let builder = self.http.request(Method::POST, &self.api("/accounts")).json(&NewAccount {
            name: namespace,
            is_org: true,
        });
        ignore_conflict(self.http.execute(builder).await.map(|_| ()))
    }

    pub async fn repository_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        self.exists(&format!("/repositories/{}/{}", namespace, name)).await
    }

    pub async fn create_repository(&self, namespace: &str, name: &str) -> Result<()> {
        let builder = self
            .http
            .request(Method::POST, &self.api(&format!("/repositories/{}", namespace)))
            .json(&NewRepository {
                name,
                visibility: "private",
            });
        ignore_conflict(self.http.execute(builder).await.map(|_| ()))
    }

    /// Every `namespace/name` visible to the account
    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let mut url = self.api(&format!("/repositories?pageSize={}", PAGE_SIZE));
            if let Some(start) = &start {
                url.push_str(&format!("&pageStart={}", start));
            }
            let response = self.http.execute(self.http.get(&url)).await?;
            let next = response
                .headers()
                .get(NEXT_PAGE_START)
                .map(|v| v.to_str())
                .transpose()?
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let page: RepositoryPage = serde_json::from_slice(&response.bytes().await?)?;
            names.extend(
                page.repositories
                    .into_iter()
                    .map(|r| format!("{}/{}", r.namespace, r.name)),
            );
            match next {
                Some(next) if start.as_deref() != Some(next.as_str()) => start = Some(next),
                _ => break,
            }
        }
        Ok(names)
    }
}

pub struct DtrAdapter {
    registry: Registry,
    client: DtrClient,
    native: NativeAdapter,
}

impl DtrAdapter {
    pub fn new(registry: Registry, client: DtrClient, native: NativeAdapter) -> Self {
        Self {
            registry,
            client,
            native,
        }
    }
}

#[async_trait]
impl Adapter for DtrAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::DTR, "Docker Trusted Registry").with_path_components("2")
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut repositories = BTreeSet::new();
        for resource in resources {
            match resource.repository().split_once('/') {
                Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                    repositories.insert((namespace, name))
                }
                _ => {
                    return Err(ReplicationError::invalid(format!(
                        "dtr repository must be in format <namespace>/<name>, but got: {}",
                        resource.repository()
                    )));
                }
            };
        }
        let namespaces: BTreeSet<&str> = repositories.iter().map(|(namespace, _)| *namespace).collect();
        for namespace in namespaces {
            if !self.client.account_exists(namespace).await? {
                self.client.create_account(namespace).await?;
                tracing::info!(namespace, "account created in dtr");
            }
        }
        for (namespace, name) in repositories {
            if !self.client.repository_exists(namespace, name).await? {
                self.client.create_repository(namespace, name).await?;
                tracing::info!(namespace, name, "repository created in dtr");
            }
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
impl ArtifactRegistry for DtrAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let repositories = filter_repositories(filters, self.client.list_repositories().await?, ResourceType::Artifact)?;
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

struct DtrFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for DtrFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let (username, password) = registry
            .credential_pair()
            .ok_or_else(|| ReplicationError::invalid("dtr requires a username and password"))?;
        let http = HttpClient::new(self.ctx.registry_client(registry)?)
            .with_modifier(Arc::new(BasicAuthCredential::new(username, password)));
        let native = NativeAdapter::new(&self.ctx, registry)?;
        Ok(Arc::new(DtrAdapter::new(
            registry.clone(),
            DtrClient::new(http, &registry.url),
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
    registry.register(RegistryType::DTR, Arc::new(DtrFactory { ctx: ctx.clone() }))
}
