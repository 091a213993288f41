//! Quay.io and self-hosted Quay
//!
//! Content uses the distribution API. Organizations are managed through the
//! Quay REST API with an OAuth2 bearer token. The stored secret is either a
//! plain password or a JSON document carrying `account_name`,
//! `docker_cli_password` and `oauth2_token`.

use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter};
use crate::auth::{self, BasicAuthCredential};
use crate::error::handlers::{HttpErrorHandler, ignore_conflict};
use crate::error::{ReplicationError, Result};
use crate::http::{HeaderModifier, HttpClient, Modifier};
use crate::model::{AdapterPattern, Endpoint, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const QUAY_URL: &str = "https://quay.io";

/// Structured secret accepted in place of a plain password
#[derive(Debug, Default, PartialEq, Eq, Deserialize)]
pub struct QuaySecret {
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub docker_cli_password: String,
    #[serde(default)]
    pub oauth2_token: String,
}

/// Docker login and API token derived from the registry credential
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QuayCredentials {
    pub docker: Option<(String, String)>,
    pub api_token: Option<String>,
}

impl QuayCredentials {
    pub fn from_registry(registry: &Registry) -> Self {
        let Some((access_key, access_secret)) = registry.credential_pair() else {
            return Self::default();
        };
        match serde_json::from_str::<QuaySecret>(&access_secret) {
            Ok(secret) => Self {
                docker: Some((secret.account_name, secret.docker_cli_password))
                    .filter(|(user, _)| !user.is_empty()),
                api_token: Some(secret.oauth2_token).filter(|t| !t.is_empty()),
            },
            Err(_) => Self {
                api_token: Some(access_key.clone()).filter(|t| !t.is_empty()),
                docker: Some((access_key, access_secret)),
            },
        }
    }
}

#[derive(Serialize)]
struct NewOrganization<'a> {
    name: &'a str,
}

pub struct QuayAdapter {
    registry: Registry,
    api: Option<HttpClient>,
    native: NativeAdapter,
}

impl QuayAdapter {
    pub fn new(registry: Registry, api: Option<HttpClient>, native: NativeAdapter) -> Self {
        Self { registry, api, native }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.registry.base_url(), path)
    }

    async fn organization_exists(&self, api: &HttpClient, namespace: &str) -> Result<bool> {
        let response = api
            .send(api.get(&self.api_url(&format!("/organization/{}", namespace))))
            .await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(HttpErrorHandler::from_response(response).await),
        }
    }

    async fn create_organization(&self, api: &HttpClient, namespace: &str) -> Result<()> {
        let builder = api
            .request(Method::POST, &self.api_url("/organization/"))
            .json(&NewOrganization { name: namespace });
        ignore_conflict(api.execute(builder).await.map(|_| ()))
    }
}

#[async_trait]
impl Adapter for QuayAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::QUAY, "Quay container registry").with_path_components("2")
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let namespaces: BTreeSet<&str> = resources
            .iter()
            .map(|r| r.repository().split('/').next().unwrap_or_default())
            .collect();
        if namespaces.contains("") {
            return Err(ReplicationError::invalid("the name of the namespace cannot be empty"));
        }
        let Some(api) = &self.api else {
            tracing::warn!(url = %self.registry.url, "no quay API token, namespaces must already exist");
            return Ok(());
        };
        for namespace in namespaces {
            if self.organization_exists(api, namespace).await? {
                tracing::debug!(namespace, "organization already exists in quay");
                continue;
            }
            self.create_organization(api, namespace)
                .await
                .map_err(|e| e.context(format!("create organization {}", namespace)))?;
            tracing::info!(namespace, "organization created in quay");
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
impl ArtifactRegistry for QuayAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        self.native.fetch_artifacts(filters).await
    }
}

struct QuayFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for QuayFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let credentials = QuayCredentials::from_registry(registry);
        let api = match &credentials.api_token {
            Some(token) => {
                let bearer: Arc<dyn Modifier> =
                    Arc::new(HeaderModifier::new("Authorization", &format!("Bearer {}", token))?);
                Some(HttpClient::new(self.ctx.client(registry.insecure)).with_modifier(bearer))
            }
            None => None,
        };
        let docker: Option<Arc<dyn Modifier>> = credentials
            .docker
            .map(|(user, password)| Arc::new(BasicAuthCredential::new(user, password)) as Arc<dyn Modifier>);
        let authorizer = auth::authorizer_for(
            registry,
            self.ctx.client(registry.insecure),
            docker,
            self.ctx.config.token_cache_capacity,
        )?;
        let native = NativeAdapter::with_authorizer(&self.ctx, registry, Some(authorizer))?;
        Ok(Arc::new(QuayAdapter::new(registry.clone(), api, native)))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        AdapterPattern::endpoints(vec![Endpoint::new("quay.io", QUAY_URL)])
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::QUAY, Arc::new(QuayFactory { ctx: ctx.clone() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credential, ResourceMetadata, ResourceType};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_credentials_from_json_secret() {
        let registry = Registry::new("q", RegistryType::QUAY, QUAY_URL).with_credential(Credential::basic(
            "ignored",
            r#"{"account_name":"robot","docker_cli_password":"pw","oauth2_token":"tok"}"#,
        ));
        let credentials = QuayCredentials::from_registry(&registry);
        assert_eq!(credentials.docker, Some(("robot".to_string(), "pw".to_string())));
        assert_eq!(credentials.api_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_credentials_from_plain_secret() {
        let registry =
            Registry::new("q", RegistryType::QUAY, QUAY_URL).with_credential(Credential::basic("token", "password"));
        let credentials = QuayCredentials::from_registry(&registry);
        assert_eq!(credentials.docker, Some(("token".to_string(), "password".to_string())));
        assert_eq!(credentials.api_token.as_deref(), Some("token"));
        assert_eq!(
            QuayCredentials::from_registry(&Registry::new("q", RegistryType::QUAY, QUAY_URL)),
            QuayCredentials::default()
        );
    }

    #[tokio::test]
    async fn test_prepare_creates_missing_organization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/organization/fresh"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/organization/"))
            .and(body_json(serde_json::json!({"name": "fresh"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let registry = Registry::new("q", RegistryType::QUAY, server.uri());
        let http = HttpClient::new(reqwest::Client::new());
        let api = http
            .clone()
            .with_modifier(Arc::new(HeaderModifier::new("Authorization", "Bearer tok").unwrap()));
        let native = NativeAdapter::with_http(&registry, http).unwrap();
        let adapter = QuayAdapter::new(registry.clone(), Some(api), native);
        let resource = Resource::new(ResourceType::Artifact, ResourceMetadata::new("fresh/app"), registry);
        adapter.prepare_for_push(&[resource]).await.unwrap();
    }
}
