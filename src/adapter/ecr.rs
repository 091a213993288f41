//! AWS Elastic Container Registry
//!
//! Content goes through the distribution API with a docker password minted
//! by `GetAuthorizationToken`. Repository management, listing and manifest
//! deletion go through the ECR SDK client.

use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter, collect_resources};
use crate::auth::{self, CredentialSource, DockerCredential, TemporaryCredential};
use crate::digest::DigestUtils;
use crate::error::handlers::{HttpErrorHandler, ignore_conflict};
use crate::error::{ReplicationError, Result};
use crate::filter::filter_repositories;
use crate::model::filter::name_pattern;
use crate::model::{AdapterPattern, Artifact, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};
use crate::util::is_specific_path;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ecr::config::Credentials;
use aws_sdk_ecr::config::http::HttpResponse;
use aws_sdk_ecr::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecr::types::{ImageFailureCode, ImageIdentifier};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use std::collections::BTreeSet;
use std::sync::Arc;

const PROVIDER_NAME: &str = "registry-replicator";

const REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "eu-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-north-1",
    "ap-east-1",
    "ap-south-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "sa-east-1",
    "me-south-1",
    "cn-north-1",
    "cn-northwest-1",
];

static REGION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://(?:api|\d+\.dkr)\.ecr\.([\w\-]+)\.amazonaws\.com").expect("static regex"));

/// Region of an `api.ecr.<region>` or `<account>.dkr.ecr.<region>` URL
pub fn parse_region(url: &str) -> Result<String> {
    REGION_PATTERN
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ReplicationError::invalid(format!("bad aws ecr url: {}", url)))
}

/// Maps an SDK failure onto the replication error kinds
fn sdk_error<E>(action: &str, err: SdkError<E, HttpResponse>) -> ReplicationError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{}: {}", action, DisplayErrorContext(&err));
    match err.code().unwrap_or_default() {
        "RepositoryAlreadyExistsException" => ReplicationError::Conflict(message),
        "RepositoryNotFoundException" | "ImageNotFoundException" => ReplicationError::NotFound(message),
        _ => match err
            .raw_response()
            .and_then(|r| StatusCode::from_u16(r.status().as_u16()).ok())
        {
            Some(status) => HttpErrorHandler::from_status(status, &message),
            None => ReplicationError::Transport(message),
        },
    }
}

/// ECR management API over static access keys
pub struct EcrApi {
    client: aws_sdk_ecr::Client,
}

impl EcrApi {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ecr::Client::new(config),
        }
    }

    /// SDK configuration for the region; `endpoint` overrides the regional API host
    pub async fn load_config(region: &str, access_key: &str, secret_key: &str, endpoint: Option<&str>) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(access_key, secret_key, None, None, PROVIDER_NAME));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        loader.load().await
    }

    pub async fn create_repository(&self, repository: &str) -> Result<()> {
        self.client
            .create_repository()
            .repository_name(repository)
            .send()
            .await
            .map_err(|e| sdk_error("CreateRepository", e))?;
        Ok(())
    }

    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .client
                .describe_repositories()
                .max_results(1000)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("DescribeRepositories", e))?;
            names.extend(
                page.repositories()
                    .iter()
                    .filter_map(|r| r.repository_name().map(str::to_string)),
            );
            match page.next_token().filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(names)
    }

    /// Deletes by tag or digest; an image that is already gone is not an error
    pub async fn batch_delete_image(&self, repository: &str, reference: &str) -> Result<()> {
        let image_id = if DigestUtils::is_digest(reference) {
            ImageIdentifier::builder().image_digest(reference).build()
        } else {
            ImageIdentifier::builder().image_tag(reference).build()
        };
        let output = self
            .client
            .batch_delete_image()
            .repository_name(repository)
            .image_ids(image_id)
            .send()
            .await
            .map_err(|e| sdk_error("BatchDeleteImage", e))?;
        match output
            .failures()
            .iter()
            .find(|f| f.failure_code() != Some(&ImageFailureCode::ImageNotFound))
        {
            Some(failure) => Err(ReplicationError::protocol(format!(
                "failed to delete {}:{}: {} {}",
                repository,
                reference,
                failure.failure_code().map(|c| c.as_str()).unwrap_or_default(),
                failure.failure_reason().unwrap_or_default()
            ))),
            None => Ok(()),
        }
    }

    /// Decoded `user:password` of the first authorization data entry
    pub async fn authorization_token(&self) -> Result<DockerCredential> {
        let output = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| sdk_error("GetAuthorizationToken", e))?;
        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| ReplicationError::protocol("no authorization data returned by ECR"))?;
        let token = data
            .authorization_token()
            .ok_or_else(|| ReplicationError::protocol("empty ECR authorization token"))?;
        let decoded = STANDARD
            .decode(token.as_bytes())
            .map_err(|e| ReplicationError::protocol(format!("bad ECR authorization token: {}", e)))?;
        let decoded = String::from_utf8_lossy(&decoded).to_string();
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| ReplicationError::protocol("ECR authorization token is not user:password"))?;
        let expires_at: DateTime<Utc> = data
            .expires_at()
            .and_then(|at| Utc.timestamp_opt(at.secs(), 0).single())
            .unwrap_or_else(Utc::now);
        Ok(DockerCredential {
            username: username.to_string(),
            password: password.to_string(),
            expires_at,
        })
    }
}

/// Mints docker passwords through `GetAuthorizationToken`
pub struct EcrCredentialSource {
    api: Arc<EcrApi>,
}

#[async_trait]
impl CredentialSource for EcrCredentialSource {
    async fn fetch(&self) -> Result<DockerCredential> {
        self.api.authorization_token().await
    }
}

pub struct EcrAdapter {
    registry: Registry,
    api: Arc<EcrApi>,
    native: NativeAdapter,
}

impl EcrAdapter {
    pub fn new(registry: Registry, api: Arc<EcrApi>, native: NativeAdapter) -> Self {
        Self { registry, api, native }
    }

    async fn candidate_repositories(&self, filters: &[Filter]) -> Result<Vec<String>> {
        if let Some(paths) = name_pattern(filters).and_then(is_specific_path) {
            return Ok(paths);
        }
        self.api.list_repositories().await
    }
}

#[async_trait]
impl Adapter for EcrAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::AWS_ECR, "AWS Elastic Container Registry")
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let repositories: BTreeSet<&str> = resources.iter().map(|r| r.repository()).collect();
        for repository in repositories {
            if repository.is_empty() {
                return Err(ReplicationError::invalid("the name of the repository cannot be empty"));
            }
            ignore_conflict(self.api.create_repository(repository).await)
                .map_err(|e| e.context(format!("create repository {}", repository)))?;
            tracing::debug!(repository, "repository ready in ECR");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        if let Err(e) = self.api.authorization_token().await {
            tracing::error!(url = %self.registry.url, error = %e, "failed to get ECR authorization token");
            return Ok(HealthStatus::Unhealthy);
        }
        self.native.health_check().await
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for EcrAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let repositories = filter_repositories(filters, self.candidate_repositories(filters).await?, ResourceType::Artifact)?;
        collect_resources(&self.registry, repositories, filters, |repository| async move {
            let tags = match self.native.list_tags(&repository).await {
                Ok(tags) => tags,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };
            Ok(tags
                .into_iter()
                .map(|tag| Artifact::tagged(ARTIFACT_TYPE_IMAGE, vec![tag]))
                .collect())
        })
        .await
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        self.api.batch_delete_image(repository, reference).await
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        self.api.batch_delete_image(repository, tag).await
    }
}

struct EcrFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for EcrFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let region = parse_region(&registry.url)?;
        let (access_key, secret_key) = registry
            .credential_pair()
            .ok_or_else(|| ReplicationError::invalid("aws ecr requires an access key and secret"))?;
        let config = EcrApi::load_config(&region, &access_key, &secret_key, None).await;
        let api = Arc::new(EcrApi::new(&config));
        let credential = Arc::new(TemporaryCredential::new(EcrCredentialSource { api: api.clone() }));
        let authorizer = auth::authorizer_for(
            registry,
            self.ctx.client(registry.insecure),
            Some(credential),
            self.ctx.config.token_cache_capacity,
        )?;
        let native = NativeAdapter::with_authorizer(&self.ctx, registry, Some(authorizer))?;
        Ok(Arc::new(EcrAdapter::new(registry.clone(), api, native)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(
            REGIONS
                .iter()
                .map(|region| Endpoint::new(*region, format!("https://api.ecr.{}.amazonaws.com", region)))
                .collect(),
        )
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::AWS_ECR, Arc::new(EcrFactory { ctx: ctx.clone() }))
}
