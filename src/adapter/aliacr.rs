//! Alibaba Cloud Container Registry (personal edition)
//!
//! The registry has no catalog; namespaces, repositories and tags come from
//! the ROA-signed `cr.<region>.aliyuncs.com` API, which also mints the
//! temporary docker login used for content.

use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::signing::{AliyunRoa, canonical_query};
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter, collect_resources};
use crate::auth::{self, CredentialSource, DockerCredential, TemporaryCredential};
use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::http::HttpClient;
use crate::model::filter::name_pattern;
use crate::model::{AdapterPattern, Artifact, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use crate::util::is_specific_path_component;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

const API_VERSION: &str = "2016-06-07";
const PAGE_SIZE: u32 = 100;

const REGIONS: &[&str] = &[
    "cn-hangzhou",
    "cn-shanghai",
    "cn-qingdao",
    "cn-beijing",
    "cn-zhangjiakou",
    "cn-huhehaote",
    "cn-shenzhen",
    "cn-chengdu",
    "cn-hongkong",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-5",
    "ap-northeast-1",
    "ap-south-1",
    "eu-central-1",
    "eu-west-1",
    "us-west-1",
    "us-east-1",
    "me-east-1",
];

static REGION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://(?:registry|cr)\.([\w\-]+)\.aliyuncs\.com").expect("static regex"));

pub fn parse_region(url: &str) -> Result<String> {
    REGION_PATTERN
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ReplicationError::invalid(format!("bad aliyun acr url: {}", url)))
}

pub fn registry_endpoint(region: &str) -> String {
    format!("https://registry.{}.aliyuncs.com", region)
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    authorization_token: String,
    temp_user_name: String,
    /// milliseconds since the epoch
    expire_date: i64,
}

#[derive(Debug, Deserialize)]
struct Namespace {
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct NamespacesData {
    #[serde(default)]
    namespaces: Vec<Namespace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Repo {
    repo_name: String,
    repo_namespace: String,
}

#[derive(Debug, Deserialize)]
struct ReposData {
    #[serde(default)]
    repos: Vec<Repo>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct TagRecord {
    tag: String,
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Deserialize)]
struct TagsData {
    #[serde(default)]
    tags: Vec<TagRecord>,
    #[serde(default)]
    total: u32,
}

/// ROA-signed client for the ACR API
pub struct AcrApi {
    http: HttpClient,
    endpoint: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl AcrApi {
    pub fn new(http: HttpClient, endpoint: &str, region: &str, access_key: &str, secret_key: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region: region.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &BTreeMap<String, String>) -> Result<T> {
        let signer = AliyunRoa {
            access_key: &self.access_key,
            secret_key: &self.secret_key,
            version: API_VERSION,
            region: &self.region,
        };
        let headers = signer.headers("GET", path, query, Utc::now(), &uuid::Uuid::new_v4().to_string())?;
        let mut url = format!("{}{}", self.endpoint, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query(query));
        }
        let mut builder = self.http.request(Method::GET, &url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let response = self.http.send(builder).await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(HttpErrorHandler::from_status(status, &String::from_utf8_lossy(&body)));
        }
        Ok(serde_json::from_slice::<Envelope<T>>(&body)?.data)
    }

    fn page(page: u32) -> BTreeMap<String, String> {
        let mut query = BTreeMap::new();
        query.insert("Page".to_string(), page.to_string());
        query.insert("PageSize".to_string(), PAGE_SIZE.to_string());
        query
    }

    async fn token(&self) -> Result<TokenData> {
        self.get("/tokens", &BTreeMap::new()).await
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        let data: NamespacesData = self.get("/namespace", &BTreeMap::new()).await?;
        Ok(data.namespaces.into_iter().map(|n| n.namespace).collect())
    }

    pub async fn list_repositories(&self, namespace: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page = 1;
        loop {
            let data: ReposData = self.get(&format!("/repos/{}", namespace), &Self::page(page)).await?;
            let empty = data.repos.is_empty();
            names.extend(data.repos.into_iter().map(|r| format!("{}/{}", r.repo_namespace, r.repo_name)));
            if empty || names.len() as u32 >= data.total {
                break;
            }
            page += 1;
        }
        Ok(names)
    }

    pub async fn list_tags(&self, repository: &str) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let mut page = 1;
        loop {
            let data: TagsData = self.get(&format!("/repos/{}/tags", repository), &Self::page(page)).await?;
            let empty = data.tags.is_empty();
            artifacts.extend(data.tags.into_iter().map(|t| {
                let artifact = Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![t.tag]);
                if t.digest.is_empty() {
                    artifact
                } else {
                    artifact.with_digest(t.digest)
                }
            }));
            if empty || artifacts.len() as u32 >= data.total {
                break;
            }
            page += 1;
        }
        Ok(artifacts)
    }
}

pub struct AcrCredentialSource {
    api: Arc<AcrApi>,
}

#[async_trait]
impl CredentialSource for AcrCredentialSource {
    async fn fetch(&self) -> Result<DockerCredential> {
        let token = self.api.token().await?;
        Ok(DockerCredential {
            username: token.temp_user_name,
            password: token.authorization_token,
            expires_at: Utc
                .timestamp_millis_opt(token.expire_date)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

pub struct AliAcrAdapter {
    registry: Registry,
    api: Arc<AcrApi>,
    native: NativeAdapter,
}

impl AliAcrAdapter {
    pub fn new(registry: Registry, api: Arc<AcrApi>, native: NativeAdapter) -> Self {
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
impl Adapter for AliAcrAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::ALI_ACR, "Alibaba Cloud Container Registry").with_path_components("2")
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.api.token().await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::error!(url = %self.registry.url, error = %e, "failed to get ACR authorization token");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for AliAcrAdapter {
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
            api.list_tags(&repository).await
        })
        .await
    }
}

struct AliAcrFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for AliAcrFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let region = parse_region(&registry.url)?;
        let (access_key, secret_key) = registry
            .credential_pair()
            .ok_or_else(|| ReplicationError::invalid("aliyun acr requires an access key and secret"))?;
        let api = Arc::new(AcrApi::new(
            HttpClient::new(self.ctx.client(registry.insecure)),
            &format!("https://cr.{}.aliyuncs.com", region),
            &region,
            &access_key,
            &secret_key,
        ));
        let mut content = registry.clone();
        content.url = registry_endpoint(&region);
        let credential = Arc::new(TemporaryCredential::new(AcrCredentialSource { api: api.clone() }));
        let authorizer = auth::authorizer_for(
            &content,
            self.ctx.client(registry.insecure),
            Some(credential),
            self.ctx.config.token_cache_capacity,
        )?;
        let native = NativeAdapter::with_authorizer(&self.ctx, &content, Some(authorizer))?;
        Ok(Arc::new(AliAcrAdapter::new(registry.clone(), api, native)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(
            REGIONS
                .iter()
                .map(|region| Endpoint::new(*region, registry_endpoint(region)))
                .collect(),
        )
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::ALI_ACR, Arc::new(AliAcrFactory { ctx: ctx.clone() }))
}
