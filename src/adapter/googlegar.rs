//! Google Artifact Registry
//!
//! Regional `*-docker.pkg.dev` hosts and the legacy `gcr.io` hosts both speak
//! the distribution API. Requests carry an OAuth2 access token minted from the
//! service-account key stored as the access secret. On `gcr.io` a manifest
//! only goes away once every tag pointing at it is removed, so deletion
//! untags first there.

use crate::adapter::{Adapter, AdapterContext, AdapterRegistry, ArtifactRegistry, Factory, NativeAdapter};
use crate::auth::oauth2::CLOUD_PLATFORM_SCOPE;
use crate::auth::OAuth2Authorizer;
use crate::digest::DigestUtils;
use crate::error::handlers::HttpErrorHandler;
use crate::error::Result;
use crate::model::{
    AdapterPattern, CredentialFieldType, CredentialPattern, Endpoint, Filter, HealthStatus, Registry, RegistryInfo,
    RegistryType, Resource,
};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

const GCR_HOSTS: &[&str] = &["gcr.io", "us.gcr.io", "eu.gcr.io", "asia.gcr.io"];

const GAR_LOCATIONS: &[&str] = &[
    "us",
    "europe",
    "asia",
    "us-central1",
    "us-east1",
    "us-east4",
    "us-west1",
    "us-west2",
    "northamerica-northeast1",
    "southamerica-east1",
    "europe-west1",
    "europe-west2",
    "europe-west3",
    "europe-west4",
    "asia-east1",
    "asia-northeast1",
    "asia-southeast1",
    "australia-southeast1",
];

/// Key of the endpoint entry that lets the user type any host
pub const CUSTOM_ENDPOINT: &str = "custom";

pub fn build_tag_list_url(endpoint: &str, repository: &str) -> String {
    format!("{}/v2/{}/tags/list", endpoint.trim_end_matches('/'), repository)
}

pub fn build_manifest_url(endpoint: &str, repository: &str, reference: &str) -> String {
    format!("{}/v2/{}/manifests/{}", endpoint.trim_end_matches('/'), repository, reference)
}

/// `gcr.io` and its regional mirrors need the untag-then-delete path
pub fn is_gcr_endpoint(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "gcr.io" || h.ends_with(".gcr.io")))
        .unwrap_or(false)
}

#[derive(Debug, Default, Deserialize)]
struct GcrManifestInfo {
    #[serde(default)]
    tag: Vec<String>,
}

/// `tags/list` as served by gcr.io, with the digest to tags index
#[derive(Debug, Default, Deserialize)]
struct GcrTagList {
    #[serde(default)]
    manifest: HashMap<String, GcrManifestInfo>,
}

pub struct GarAdapter {
    native: NativeAdapter,
    gcr_delete: bool,
}

impl GarAdapter {
    pub fn new(native: NativeAdapter, gcr_delete: bool) -> Self {
        Self { native, gcr_delete }
    }

    async fn delete_reference(&self, repository: &str, reference: &str) -> Result<()> {
        let http = self.native.client().http();
        let url = build_manifest_url(&self.native.registry().base_url(), repository, reference);
        let response = http.send(http.request(Method::DELETE, &url)).await?;
        match response.status().as_u16() {
            200..=299 | 404 => Ok(()),
            _ => Err(HttpErrorHandler::from_response(response).await),
        }
    }

    /// Removes every tag of the manifest, then the manifest itself
    async fn delete_gcr_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        let digest = if DigestUtils::is_digest(reference) {
            reference.to_string()
        } else {
            match self.native.manifest_exist(repository, reference).await? {
                Some(descriptor) => descriptor.digest,
                None => return Ok(()),
            }
        };
        let listing: GcrTagList = self
            .native
            .client()
            .http()
            .get_json(&build_tag_list_url(&self.native.registry().base_url(), repository))
            .await?;
        let tags = listing.manifest.get(&digest).map(|m| m.tag.clone()).unwrap_or_default();
        for tag in &tags {
            self.delete_reference(repository, tag).await?;
        }
        tracing::debug!(repository, digest = %digest, untagged = tags.len(), "deleting gcr manifest");
        self.delete_reference(repository, &digest).await
    }
}

#[async_trait]
impl Adapter for GarAdapter {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(RegistryType::GOOGLE_GAR, "Google Artifact Registry")
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        self.native.health_check().await
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for GarAdapter {
    fn base(&self) -> Option<&NativeAdapter> {
        Some(&self.native)
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        self.native.fetch_artifacts(filters).await
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        if self.gcr_delete {
            self.delete_gcr_manifest(repository, reference).await
        } else {
            self.native.delete_manifest(repository, reference).await
        }
    }
}

struct GarFactory {
    ctx: AdapterContext,
}

#[async_trait]
impl Factory for GarFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let key = registry
            .credential
            .as_ref()
            .map(|c| c.access_secret.as_str())
            .filter(|secret| !secret.trim().is_empty());
        let native = match key {
            Some(key) => {
                let authorizer =
                    OAuth2Authorizer::new(self.ctx.registry_client(registry)?, key, &[CLOUD_PLATFORM_SCOPE])?;
                NativeAdapter::with_authorizer(&self.ctx, registry, Some(Arc::new(authorizer)))?
            }
            None => NativeAdapter::with_authorizer(&self.ctx, registry, None)?,
        };
        Ok(Arc::new(GarAdapter::new(native, is_gcr_endpoint(&registry.url))))
    }

    fn adapter_pattern(&self) -> AdapterPattern {
        let gcr = GCR_HOSTS.iter().map(|host| Endpoint::new(*host, format!("https://{}", host)));
        let gar = GAR_LOCATIONS.iter().map(|location| {
            let host = format!("{}-docker.pkg.dev", location);
            Endpoint::new(host.clone(), format!("https://{}", host))
        });
        let endpoints = gcr
            .chain(gar)
            .chain(std::iter::once(Endpoint::new(CUSTOM_ENDPOINT, "")))
            .collect();
        AdapterPattern::endpoints(endpoints).with_credential(CredentialPattern {
            access_key_type: CredentialFieldType::Free,
            access_key_data: String::new(),
            access_secret_type: CredentialFieldType::File,
            access_secret_data: "No Change".to_string(),
        })
    }
}

pub fn register(registry: &AdapterRegistry, ctx: &AdapterContext) -> Result<()> {
    registry.register(RegistryType::GOOGLE_GAR, Arc::new(GarFactory { ctx: ctx.clone() }))
}
