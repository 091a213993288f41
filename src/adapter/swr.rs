//! Huawei SoftWare Repository for Container
//!
//! Namespaces and repositories are managed through the `/dockyard/v2` API
//! with Basic credentials. Distribution calls carry a per-repository bearer
//! token from `/swr/auth/v2/registry/auth`.

use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter};
use crate::auth::{ACTION_PULL, ACTION_PUSH, BasicAuthCredential, Scope, Token, TokenCache, parse_scopes};
use crate::error::handlers::{HttpErrorHandler, ignore_conflict};
use crate::error::{ReplicationError, Result};
use crate::filter::{filter_artifacts, filter_repositories};
use crate::http::{HttpClient, Modifier};
use crate::model::{
    AdapterPattern, Artifact, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource,
    ResourceMetadata, ResourceType,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, Request};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const REGIONS: &[&str] = &["cn-north-1", "cn-north-4", "cn-east-2", "cn-east-3", "cn-south-1", "ap-southeast-1"];

#[derive(Debug, Deserialize)]
struct NamespaceRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamespacesResponse {
    #[serde(default)]
    namespaces: Vec<NamespaceRecord>,
}

#[derive(Serialize)]
struct NewNamespace<'a> {
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    name: String,
    namespace: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// Dockyard API client
pub struct SwrClient {
    http: HttpClient,
    url: String,
}

impl SwrClient {
    pub fn new(http: HttpClient, url: &str) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/dockyard/v2{}", self.url, path)
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        let response: NamespacesResponse = self.http.get_json(&self.api("/namespaces")).await?;
        Ok(response.namespaces.into_iter().map(|n| n.name).collect())
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let response = self
            .http
            .send(self.http.get(&self.api(&format!("/namespaces/{}", namespace))))
            .await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(HttpErrorHandler::from_response(response).await),
        }
    }

    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let builder = self
            .http
            .request(Method::POST, &self.api("/namespaces"))
            .json(&NewNamespace { namespace });
        ignore_conflict(self.http.execute(builder).await.map(|_| ()))
    }

    /// Every repository owned by the account, tags included
    async fn list_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        self.http
            .get_json(&self.api("/repositories?filter=center::self"))
            .await
    }
}

/// Per-repository bearer tokens, fetched with the account's Basic credential
pub struct SwrTokenAuthorizer {
    url: String,
    http: HttpClient,
    cache: TokenCache,
}

impl SwrTokenAuthorizer {
    pub fn new(url: &str, http: HttpClient, capacity: usize) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            http,
            cache: TokenCache::new(capacity),
        }
    }

    async fn token(&self, repository: &str) -> Result<String> {
        if let Some(token) = self.cache.get(repository) {
            return Ok(token.token);
        }
        let scope = Scope::repository(repository, &[ACTION_PUSH, ACTION_PULL]);
        let url = format!("{}/swr/auth/v2/registry/auth?scope={}", self.url, scope);
        let response = self.http.send(self.http.get(&url)).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(HttpErrorHandler::token_error(status, &body));
        }
        let token: Token = serde_json::from_slice(&response.bytes().await?)?;
        let token = token.normalize(Utc::now());
        if token.token.is_empty() {
            return Err(ReplicationError::protocol("empty token returned by swr"));
        }
        let value = token.token.clone();
        self.cache.set(repository, token);
        Ok(value)
    }
}

#[async_trait]
impl Modifier for SwrTokenAuthorizer {
    async fn modify(&self, request: &mut Request) -> Result<()> {
        // the last scope is the repository being addressed; a `from` mount source comes first
        let Some(scope) = parse_scopes(request.method(), request.url()).pop() else {
            return Ok(());
        };
        if scope.scope_type != crate::auth::scope::SCOPE_TYPE_REPOSITORY {
            return Ok(());
        }
        let token = self.token(&scope.name).await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

pub struct SwrAdapter {
    registry: Registry,
    client: SwrClient,
    native: NativeAdapter,
}

impl SwrAdapter {
    pub fn new(registry: Registry, client: SwrClient, native: NativeAdapter) -> Self {
        Self {
            registry,
            client,
            native,
        }
    }
}

#[async_trait]
impl Adapter for SwrAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::HUAWEI_SWR, "Huawei SoftWare Repository for Container")
            .with_path_components("2")
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut namespaces = BTreeSet::new();
        for resource in resources {
            match resource.repository().split_once('/') {
                Some((namespace, _)) if !namespace.is_empty() => namespaces.insert(namespace),
                _ => {
                    return Err(ReplicationError::invalid(format!(
                        "swr repository must be in format <namespace>/<name>, but got: {}",
                        resource.repository()
                    )));
                }
            };
        }
        for namespace in namespaces {
            if self.client.namespace_exists(namespace).await? {
                tracing::debug!(namespace, "namespace already exists in swr");
                continue;
            }
            self.client.create_namespace(namespace).await?;
            tracing::info!(namespace, "namespace created in swr");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.client.list_namespaces().await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::error!(url = %self.registry.url, error = %e, "failed to list swr namespaces");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for SwrAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    /// The repository listing already carries tags, so no fan-out is needed
    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let mut tags: HashMap<String, Vec<String>> = HashMap::new();
        for record in self.client.list_repositories().await? {
            tags.insert(format!("{}/{}", record.namespace, record.name), record.tags);
        }
        let names = filter_repositories(filters, tags.keys().cloned().collect(), ResourceType::Artifact)?;
        let mut resources = Vec::new();
        for name in names {
            let artifacts: Vec<Artifact> = tags
                .remove(&name)
                .unwrap_or_default()
                .into_iter()
                .map(|tag| Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![tag]))
                .collect();
            let artifacts = filter_artifacts(&artifacts, filters)?;
            if artifacts.is_empty() {
                continue;
            }
            let mut metadata = ResourceMetadata::new(name);
            metadata.artifacts = artifacts;
            resources.push(Resource::new(ResourceType::Artifact, metadata, self.registry.clone()));
        }
        resources.sort_by(|a, b| a.repository().cmp(b.repository()));
        Ok(resources)
    }
}

struct SwrFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for SwrFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let (username, password) = registry
            .credential_pair()
            .ok_or_else(|| ReplicationError::invalid("huawei swr requires a username and password"))?;
        let basic = HttpClient::new(self.ctx.client(registry.insecure))
            .with_modifier(Arc::new(BasicAuthCredential::new(username, password)));
        let authorizer = SwrTokenAuthorizer::new(&registry.url, basic.clone(), self.ctx.config.token_cache_capacity);
        let native = NativeAdapter::with_authorizer(&self.ctx, registry, Some(Arc::new(authorizer)))?;
        Ok(Arc::new(SwrAdapter::new(
            registry.clone(),
            SwrClient::new(basic, &registry.url),
            native,
        )))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(
            REGIONS
                .iter()
                .map(|region| Endpoint::new(*region, format!("https://swr.{}.myhuaweicloud.com", region)))
                .collect(),
        )
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::HUAWEI_SWR, Arc::new(SwrFactory { ctx: ctx.clone() }))
}
