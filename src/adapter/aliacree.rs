//! Alibaba Cloud Container Registry, Enterprise Edition
//!
//! Instance URLs look like `https://<instance>-registry.<region>.cr.aliyuncs.com`
//! (or `-registry-vpc`). The instance id is resolved once through
//! `ListInstance`; listing and temporary docker credentials go through the
//! RPC-signed `cr.<region>.aliyuncs.com` API.

use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::signing::AliyunRpc;
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter, collect_resources};
use crate::auth::{self, CredentialSource, DockerCredential, TemporaryCredential};
use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::HttpClient;
use crate::model::{AdapterPattern, Artifact, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const API_VERSION: &str = "2018-12-01";
/// Instances hold at most this many repositories
const REPOSITORY_PAGE_SIZE: u32 = 9999;
const TAG_PAGE_SIZE: u64 = 100;

static INSTANCE_REGION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://([\w\-._]+)-(?:registry|registry-vpc)\.([\w\-]+)\.cr\.aliyuncs\.com").expect("static regex")
});

/// `(instance name, region)` from an instance URL
pub fn parse_instance_region(url: &str) -> Result<(String, String)> {
    let captures = INSTANCE_REGION
        .captures(url)
        .ok_or_else(|| ReplicationError::invalid(format!("invalid Aliyun Registry Enterprise Edition url: {}", url)))?;
    Ok((captures[1].to_string(), captures[2].to_string()))
}

pub fn api_endpoint(region: &str) -> String {
    format!("https://cr.{}.aliyuncs.com", region)
}

/// `TotalCount` arrives as a string or a number depending on the call
fn count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(rename = "IsSuccess", default = "default_true")]
    is_success: bool,
    #[serde(rename = "Code", default)]
    code: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_name: String,
    instance_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListInstanceResponse {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthorizationTokenResponse {
    authorization_token: String,
    temp_username: String,
    /// milliseconds since the epoch
    expire_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepositoryItem {
    pub repo_id: String,
    pub repo_name: String,
    pub repo_namespace_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListRepositoryResponse {
    #[serde(default)]
    repositories: Vec<RepositoryItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Image {
    tag: String,
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListRepoTagResponse {
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    total_count: Value,
}

/// RPC-signed client bound to one enterprise instance
pub struct AcrEeApi {
    http: HttpClient,
    endpoint: String,
    access_key: String,
    secret_key: String,
    instance_id: String,
}

impl AcrEeApi {
    pub fn new(http: HttpClient, endpoint: &str, access_key: &str, secret_key: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            instance_id: String::new(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, params: &[(&str, &str)]) -> Result<T> {
        let signer = AliyunRpc {
            access_key: &self.access_key,
            secret_key: &self.secret_key,
            version: API_VERSION,
        };
        let params: BTreeMap<String, String> = params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let query = signer.query(action, &params, Utc::now(), &uuid::Uuid::new_v4().to_string())?;
        let url = format!("{}/?{}", self.endpoint, query);
        let response = self.http.send(self.http.get(&url)).await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(HttpErrorHandler::from_status(status, &String::from_utf8_lossy(&body)));
        }
        let outcome: Status = serde_json::from_slice(&body)?;
        if !outcome.is_success {
            return Err(ReplicationError::protocol(format!(
                "{} was not successful: {} {}",
                action,
                outcome.code,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Id of the running instance with exactly this name
    pub async fn find_instance_id(&self, instance_name: &str) -> Result<String> {
        let response: ListInstanceResponse = self
            .call(
                "ListInstance",
                &[("InstanceName", instance_name), ("InstanceStatus", "RUNNING")],
            )
            .await?;
        response
            .instances
            .into_iter()
            .find(|i| i.instance_name == instance_name)
            .map(|i| i.instance_id)
            .ok_or_else(|| ReplicationError::NotFound(format!("no running ACR EE instance named {}", instance_name)))
    }

    pub async fn get_instance(&self) -> Result<()> {
        self.call::<Value>("GetInstance", &[("InstanceId", self.instance_id.as_str())]).await.map(|_| ())
    }

    async fn authorization_token(&self) -> Result<AuthorizationTokenResponse> {
        self.call("GetAuthorizationToken", &[("InstanceId", self.instance_id.as_str())]).await
    }

    pub async fn list_repositories(&self) -> Result<Vec<RepositoryItem>> {
        let page_size = REPOSITORY_PAGE_SIZE.to_string();
        let response: ListRepositoryResponse = self
            .call(
                "ListRepository",
                &[
                    ("InstanceId", self.instance_id.as_str()),
                    ("PageNo", "1"),
                    ("PageSize", page_size.as_str()),
                    ("RepoStatus", "ALL"),
                ],
            )
            .await?;
        Ok(response.repositories)
    }

    pub async fn list_tags(&self, repo_id: &str) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let page_size = TAG_PAGE_SIZE.to_string();
        let mut page: u64 = 1;
        loop {
            let page_no = page.to_string();
            let response: ListRepoTagResponse = self
                .call(
                    "ListRepoTag",
                    &[
                        ("InstanceId", self.instance_id.as_str()),
                        ("RepoId", repo_id),
                        ("PageNo", page_no.as_str()),
                        ("PageSize", page_size.as_str()),
                    ],
                )
                .await?;
            let empty = response.images.is_empty();
            artifacts.extend(response.images.into_iter().map(|image| {
                let artifact = Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![image.tag]);
                if image.digest.is_empty() {
                    artifact
                } else {
                    artifact.with_digest(format!("sha256:{}", image.digest.trim_start_matches("sha256:")))
                }
            }));
            if empty || page * TAG_PAGE_SIZE >= count(&response.total_count) {
                break;
            }
            page += 1;
        }
        Ok(artifacts)
    }
}

pub struct AcrEeCredentialSource {
    api: Arc<AcrEeApi>,
}

#[async_trait]
impl CredentialSource for AcrEeCredentialSource {
    async fn fetch(&self) -> Result<DockerCredential> {
        let token = self.api.authorization_token().await?;
        Ok(DockerCredential {
            username: token.temp_username,
            password: token.authorization_token,
            expires_at: Utc
                .timestamp_millis_opt(token.expire_time)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

pub struct AliAcrEeAdapter {
    registry: Registry,
    api: Arc<AcrEeApi>,
    native: NativeAdapter,
}

impl AliAcrEeAdapter {
    pub fn new(registry: Registry, api: Arc<AcrEeApi>, native: NativeAdapter) -> Self {
        Self { registry, api, native }
    }
}

#[async_trait]
impl Adapter for AliAcrEeAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(
            RegistryType::ALI_ACR_EE,
            "Alibaba Cloud Container Registry Enterprise Edition",
        )
    }

    /// Reachable when the instance details can be read
    async fn health_check(&self) -> Result<HealthStatus> {
        match self.api.get_instance().await {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::error!(instance = self.api.instance_id(), error = %e, "failed to get ACR EE instance");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for AliAcrEeAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let items = self.api.list_repositories().await?;
        let ids: HashMap<String, String> = items
            .into_iter()
            .map(|item| (format!("{}/{}", item.repo_namespace_name, item.repo_name), item.repo_id))
            .collect();
        let repositories = filter_repositories(filters, ids.keys().cloned().collect(), ResourceType::Artifact)?;
        tracing::debug!(count = repositories.len(), "selected ACR EE repositories");
        let ids = &ids;
        let api = &self.api;
        collect_resources(&self.registry, repositories, filters, |repository| async move {
            match ids.get(&repository) {
                Some(id) => api.list_tags(id).await,
                None => Ok(Vec::new()),
            }
        })
        .await
    }
}

struct AliAcrEeFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for AliAcrEeFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let (instance_name, region) = parse_instance_region(&registry.url)?;
        let (access_key, secret_key) = registry
            .credential_pair()
            .ok_or_else(|| ReplicationError::invalid("aliyun acr ee requires an access key and secret"))?;
        let api = AcrEeApi::new(
            HttpClient::new(self.ctx.client(registry.insecure)),
            &api_endpoint(&region),
            &access_key,
            &secret_key,
        );
        let instance_id = api.find_instance_id(&instance_name).await?;
        tracing::info!(instance = %instance_name, instance_id = %instance_id, region = %region, "resolved ACR EE instance");
        let api = Arc::new(api.with_instance_id(instance_id));

        let credential = Arc::new(TemporaryCredential::new(AcrEeCredentialSource { api: api.clone() }));
        let authorizer = auth::authorizer_for(
            registry,
            self.ctx.client(registry.insecure),
            Some(credential),
            self.ctx.config.token_cache_capacity,
        )?;
        let native = NativeAdapter::with_authorizer(&self.ctx, registry, Some(authorizer))?;
        Ok(Arc::new(AliAcrEeAdapter::new(registry.clone(), api, native)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(
            ["cn-hangzhou", "cn-shanghai", "cn-qingdao", "cn-beijing"]
                .iter()
                .map(|region| {
                    Endpoint::new(
                        *region,
                        format!("https://{{instanceName}}-registry.{}.cr.aliyuncs.com", region),
                    )
                })
                .collect(),
        )
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::ALI_ACR_EE, Arc::new(AliAcrEeFactory { ctx: ctx.clone() }))
}
