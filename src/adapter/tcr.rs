//! Tencent Container Registry (enterprise instances)
//!
//! Instances are addressed as `https://<registry>.tencentcloudcr.com`. The
//! instance id and region are looked up by registry name through
//! `DescribeInstances`; everything else goes through the TC3-signed TCR API.

use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::signing::{TC3_CONTENT_TYPE, Tc3, host_header};
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter, collect_resources};
use crate::auth::{self, CredentialSource, DockerCredential, TemporaryCredential};
use crate::error::handlers::{HttpErrorHandler, ignore_conflict};
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::HttpClient;
use crate::model::filter::name_pattern;
use crate::model::{AdapterPattern, Artifact, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use crate::util::is_specific_path_component;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use url::Url;

pub const API_ENDPOINT: &str = "https://tcr.tencentcloudapi.com";
const API_VERSION: &str = "2019-09-24";
const SERVICE: &str = "tcr";
/// Region used for the instance lookup before the real region is known
const LOOKUP_REGION: &str = "ap-guangzhou";
const PAGE_LIMIT: u64 = 100;

static REGISTRY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://([\w\-]+)\.tencentcloudcr\.com").expect("static regex"));

pub fn parse_registry_name(url: &str) -> Result<String> {
    REGISTRY_NAME
        .captures(url)
        .map(|c| c[1].to_string())
        .ok_or_else(|| ReplicationError::invalid(format!("invalid tencent tcr url: {}", url)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub registry_id: String,
    pub registry_name: String,
    pub region_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    registries: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceTokenResponse {
    username: String,
    token: String,
    /// milliseconds since the epoch
    exp_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NamespaceRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeNamespacesResponse {
    #[serde(default)]
    namespace_list: Vec<NamespaceRecord>,
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RepositoryRecord {
    /// `namespace/repository`
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeRepositoriesResponse {
    #[serde(default)]
    repository_list: Vec<RepositoryRecord>,
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageRecord {
    image_version: String,
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeImagesResponse {
    #[serde(default)]
    image_info_list: Vec<ImageRecord>,
    #[serde(default)]
    total_count: u64,
}

/// Splits `namespace/repository`; the repository part may hold further slashes
fn split_repository(name: &str) -> Result<(&str, &str)> {
    match name.split_once('/') {
        Some((namespace, repository)) if !namespace.is_empty() && !repository.is_empty() => {
            Ok((namespace, repository))
        }
        _ => Err(ReplicationError::invalid(format!(
            "tcr repository must be in format <namespace>/<repository>, but got: {}",
            name
        ))),
    }
}

/// TC3-signed client for one TCR instance
pub struct TcrApi {
    http: HttpClient,
    endpoint: Url,
    region: String,
    secret_id: String,
    secret_key: String,
    registry_id: String,
}

impl TcrApi {
    pub fn new(http: HttpClient, endpoint: &str, secret_id: &str, secret_key: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
            region: LOOKUP_REGION.to_string(),
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
            registry_id: String::new(),
        })
    }

    pub fn with_instance(mut self, instance: &Instance) -> Self {
        self.region = instance.region_name.clone();
        self.registry_id = instance.registry_id.clone();
        self
    }

    pub async fn call<T: DeserializeOwned>(&self, action: &str, body: Value) -> Result<T> {
        let payload = serde_json::to_vec(&body)?;
        let now = Utc::now();
        let signer = Tc3 {
            secret_id: &self.secret_id,
            secret_key: &self.secret_key,
            service: SERVICE,
        };
        let authorization = signer.authorization(&host_header(&self.endpoint)?, &payload, now)?;
        let builder = self
            .http
            .request(Method::POST, self.endpoint.as_str())
            .header("Content-Type", TC3_CONTENT_TYPE)
            .header("Authorization", authorization)
            .header("X-TC-Action", action)
            .header("X-TC-Version", API_VERSION)
            .header("X-TC-Timestamp", now.timestamp().to_string())
            .header("X-TC-Region", self.region.as_str())
            .body(payload);
        let response = self.http.send(builder).await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(HttpErrorHandler::from_status(status, &String::from_utf8_lossy(&body)));
        }
        let envelope: Envelope = serde_json::from_slice(&body)?;
        if let Some(error) = envelope.response.get("Error") {
            let error: ApiError = serde_json::from_value(error.clone())?;
            let message = format!("{} {}: {}", action, error.code, error.message);
            return Err(if error.code.contains("AlreadyExist") || error.code == "ResourceInUse" {
                ReplicationError::Conflict(message)
            } else if error.code.starts_with("ResourceNotFound") {
                ReplicationError::NotFound(message)
            } else if error.code.starts_with("AuthFailure") {
                ReplicationError::Unauthorized(message)
            } else {
                ReplicationError::protocol(message)
            });
        }
        Ok(serde_json::from_value(envelope.response)?)
    }

    pub async fn find_instance(&self, registry_name: &str) -> Result<Instance> {
        let response: DescribeInstancesResponse = self
            .call(
                "DescribeInstances",
                json!({ "Filters": [{ "Name": "RegistryName", "Values": [registry_name] }], "AllRegion": true }),
            )
            .await?;
        response
            .registries
            .into_iter()
            .find(|r| r.registry_name == registry_name)
            .ok_or_else(|| ReplicationError::NotFound(format!("no tcr instance named {}", registry_name)))
    }

    async fn instance_token(&self) -> Result<InstanceTokenResponse> {
        self.call(
            "CreateInstanceToken",
            json!({ "RegistryId": self.registry_id, "TokenType": "temp" }),
        )
        .await
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut offset = 0;
        loop {
            let page: DescribeNamespacesResponse = self
                .call(
                    "DescribeNamespaces",
                    json!({ "RegistryId": self.registry_id, "Limit": PAGE_LIMIT, "Offset": offset }),
                )
                .await?;
            let empty = page.namespace_list.is_empty();
            names.extend(page.namespace_list.into_iter().map(|n| n.name));
            offset += PAGE_LIMIT;
            if empty || offset >= page.total_count {
                break;
            }
        }
        Ok(names)
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let page: DescribeNamespacesResponse = self
            .call(
                "DescribeNamespaces",
                json!({ "RegistryId": self.registry_id, "NamespaceName": namespace, "Limit": PAGE_LIMIT }),
            )
            .await?;
        Ok(page.namespace_list.iter().any(|n| n.name == namespace))
    }

    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.call::<Value>(
            "CreateNamespace",
            json!({ "RegistryId": self.registry_id, "NamespaceName": namespace, "IsPublic": false }),
        )
        .await
        .map(|_| ())
    }

    pub async fn create_repository(&self, namespace: &str, repository: &str) -> Result<()> {
        self.call::<Value>(
            "CreateRepository",
            json!({ "RegistryId": self.registry_id, "NamespaceName": namespace, "RepositoryName": repository }),
        )
        .await
        .map(|_| ())
    }

    pub async fn list_repositories(&self, namespace: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut offset = 0;
        loop {
            let page: DescribeRepositoriesResponse = self
                .call(
                    "DescribeRepositories",
                    json!({
                        "RegistryId": self.registry_id,
                        "NamespaceName": namespace,
                        "Limit": PAGE_LIMIT,
                        "Offset": offset
                    }),
                )
                .await?;
            let empty = page.repository_list.is_empty();
            names.extend(page.repository_list.into_iter().map(|r| r.name));
            offset += PAGE_LIMIT;
            if empty || offset >= page.total_count {
                break;
            }
        }
        Ok(names)
    }

    pub async fn list_images(&self, repository: &str) -> Result<Vec<Artifact>> {
        let (namespace, name) = split_repository(repository)?;
        let mut artifacts = Vec::new();
        let mut offset = 0;
        loop {
            let page: DescribeImagesResponse = self
                .call(
                    "DescribeImages",
                    json!({
                        "RegistryId": self.registry_id,
                        "NamespaceName": namespace,
                        "RepositoryName": name,
                        "Limit": PAGE_LIMIT,
                        "Offset": offset
                    }),
                )
                .await?;
            let empty = page.image_info_list.is_empty();
            artifacts.extend(page.image_info_list.into_iter().map(|image| {
                let artifact = Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![image.image_version]);
                if image.digest.is_empty() {
                    artifact
                } else {
                    artifact.with_digest(image.digest)
                }
            }));
            offset += PAGE_LIMIT;
            if empty || offset >= page.total_count {
                break;
            }
        }
        Ok(artifacts)
    }
}

pub struct TcrCredentialSource {
    api: Arc<TcrApi>,
}

#[async_trait]
impl CredentialSource for TcrCredentialSource {
    async fn fetch(&self) -> Result<DockerCredential> {
        let token = self.api.instance_token().await?;
        Ok(DockerCredential {
            username: token.username,
            password: token.token,
            expires_at: Utc.timestamp_millis_opt(token.exp_time).single().unwrap_or_else(Utc::now),
        })
    }
}

pub struct TcrAdapter {
    registry: Registry,
    api: Arc<TcrApi>,
    native: NativeAdapter,
}

impl TcrAdapter {
    pub fn new(registry: Registry, api: Arc<TcrApi>, native: NativeAdapter) -> Self {
        Self { registry, api, native }
    }

    async fn candidate_namespaces(&self, filters: &[Filter]) -> Result<Vec<String>> {
        let first = name_pattern(filters).and_then(|p| p.split('/').next());
        if let Some(namespaces) = first.and_then(is_specific_path_component) {
            return Ok(namespaces);
        }
        self.api.list_namespaces().await
    }
}

#[async_trait]
impl Adapter for TcrAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::TENCENT_TCR, "Tencent Container Registry")
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut namespaces = BTreeSet::new();
        let mut repositories = BTreeSet::new();
        for resource in resources {
            let (namespace, repository) = split_repository(resource.repository())?;
            namespaces.insert(namespace);
            repositories.insert((namespace, repository));
        }
        for namespace in namespaces {
            if self.api.namespace_exists(namespace).await? {
                tracing::debug!(namespace, "namespace already exists in TCR");
                continue;
            }
            ignore_conflict(self.api.create_namespace(namespace).await)?;
            tracing::info!(namespace, "namespace created in TCR");
        }
        for (namespace, repository) in repositories {
            ignore_conflict(self.api.create_repository(namespace, repository).await)?;
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
impl ArtifactRegistry for TcrAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let mut repositories = Vec::new();
        for namespace in self.candidate_namespaces(filters).await? {
            repositories.extend(self.api.list_repositories(&namespace).await?);
        }
        let repositories = filter_repositories(filters, repositories, ResourceType::Artifact)?;
        let api = &self.api;
        collect_resources(&self.registry, repositories, filters, |repository| async move {
            api.list_images(&repository).await
        })
        .await
    }
}

struct TcrFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for TcrFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let registry_name = parse_registry_name(&registry.url)?;
        let (secret_id, secret_key) = registry
            .credential_pair()
            .ok_or_else(|| ReplicationError::invalid("tencent tcr requires a secret id and key"))?;
        let api = TcrApi::new(
            HttpClient::new(self.ctx.client(registry.insecure)),
            API_ENDPOINT,
            &secret_id,
            &secret_key,
        )?;
        let instance = api.find_instance(&registry_name).await?;
        tracing::info!(registry = %registry_name, id = %instance.registry_id, region = %instance.region_name, "resolved tcr instance");
        let api = Arc::new(api.with_instance(&instance));

        let credential = Arc::new(TemporaryCredential::new(TcrCredentialSource { api: api.clone() }));
        let authorizer = auth::authorizer_for(
            registry,
            self.ctx.client(registry.insecure),
            Some(credential),
            self.ctx.config.token_cache_capacity,
        )?;
        let native = NativeAdapter::with_authorizer(&self.ctx, registry, Some(authorizer))?;
        Ok(Arc::new(TcrAdapter::new(registry.clone(), api, native)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::default()
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::TENCENT_TCR, Arc::new(TcrFactory { ctx: ctx.clone() }))
}
