//! Registry endpoint records and their credentials

use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use url::Url;

/// Registry type tag. Open so that externally registered adapters can add their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryType(Cow<'static, str>);

impl RegistryType {
    pub const HARBOR: RegistryType = RegistryType::from_static("harbor");
    pub const DOCKER_HUB: RegistryType = RegistryType::from_static("docker-hub");
    pub const DOCKER_REGISTRY: RegistryType = RegistryType::from_static("docker-registry");
    pub const HUAWEI_SWR: RegistryType = RegistryType::from_static("huawei-SWR");
    pub const GOOGLE_GCR: RegistryType = RegistryType::from_static("google-gcr");
    pub const GOOGLE_GAR: RegistryType = RegistryType::from_static("google-gar");
    pub const AWS_ECR: RegistryType = RegistryType::from_static("aws-ecr");
    pub const AZURE_ACR: RegistryType = RegistryType::from_static("azure-acr");
    pub const ALI_ACR: RegistryType = RegistryType::from_static("ali-acr");
    pub const ALI_ACR_EE: RegistryType = RegistryType::from_static("ali-acr-ee");
    pub const JFROG_ARTIFACTORY: RegistryType = RegistryType::from_static("jfrog-artifactory");
    pub const QUAY: RegistryType = RegistryType::from_static("quay");
    pub const GITLAB: RegistryType = RegistryType::from_static("gitlab");
    pub const HELM_HUB: RegistryType = RegistryType::from_static("helm-hub");
    pub const ARTIFACT_HUB: RegistryType = RegistryType::from_static("artifact-hub");
    pub const DTR: RegistryType = RegistryType::from_static("dtr");
    pub const TENCENT_TCR: RegistryType = RegistryType::from_static("tencent-tcr");
    pub const GITHUB_GHCR: RegistryType = RegistryType::from_static("github-ghcr");

    pub const fn from_static(value: &'static str) -> Self {
        RegistryType(Cow::Borrowed(value))
    }

    pub fn new(value: impl Into<String>) -> Self {
        RegistryType(Cow::Owned(value.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegistryType {
    fn from(value: &str) -> Self {
        RegistryType::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    Basic,
    #[serde(rename = "oauth")]
    OAuth,
    /// Reserved for communication between components of the same instance
    Secret,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type")]
    pub kind: CredentialType,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub access_secret: String,
}

impl Credential {
    pub fn basic(access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            kind: CredentialType::Basic,
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        }
    }

    pub fn secret(secret: impl Into<String>) -> Self {
        Self {
            kind: CredentialType::Secret,
            access_key: String::new(),
            access_secret: secret.into(),
        }
    }
}

// keep secrets out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("access_key", &self.access_key)
            .field("access_secret", &"******")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A registry endpoint as stored by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub insecure: bool,
    /// PEM bundle trusted instead of the system roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
    #[serde(default)]
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Registry {
    pub fn new(name: impl Into<String>, registry_type: RegistryType, url: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            registry_type,
            url: url.into(),
            token_service_url: None,
            credential: None,
            insecure: false,
            ca_certificate: None,
            status: HealthStatus::Unknown,
            creation_time: None,
            update_time: None,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_ca_certificate(mut self, pem: impl Into<String>) -> Self {
        self.ca_certificate = Some(pem.into());
        self
    }

    pub fn with_token_service_url(mut self, url: impl Into<String>) -> Self {
        self.token_service_url = Some(url.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry_type.is_empty() {
            return Err(ReplicationError::invalid("registry type is required"));
        }
        self.parsed_url()?;
        if let Some(token_service_url) = &self.token_service_url {
            Url::parse(token_service_url)?;
        }
        if let Some(credential) = &self.credential {
            if credential.kind != CredentialType::Secret && credential.access_key.is_empty() {
                return Err(ReplicationError::invalid("credential access key is required"));
            }
        }
        Ok(())
    }

    /// Parses the endpoint URL; only http and https are accepted
    pub fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ReplicationError::invalid(format!(
                "unsupported URL scheme {} in {}",
                other, self.url
            ))),
        }
    }

    /// Endpoint URL without a trailing slash
    pub fn base_url(&self) -> String {
        self.url.trim_end_matches('/').to_string()
    }

    /// `(access_key, access_secret)` when a non-empty credential is set
    pub fn credential_pair(&self) -> Option<(String, String)> {
        self.credential
            .as_ref()
            .filter(|c| !c.access_key.is_empty() || !c.access_secret.is_empty())
            .map(|c| (c.access_key.clone(), c.access_secret.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_serde_names() {
        let json = r#"{
            "name": "hub",
            "type": "docker-hub",
            "url": "https://hub.docker.com",
            "credential": {"type": "basic", "access_key": "u", "access_secret": "p"},
            "insecure": true
        }"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.registry_type, RegistryType::DOCKER_HUB);
        assert!(registry.insecure);
        assert_eq!(registry.status, HealthStatus::Unknown);
        assert_eq!(registry.credential_pair(), Some(("u".to_string(), "p".to_string())));
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let registry = Registry::new("bad", RegistryType::HARBOR, "not a url");
        assert!(registry.validate().is_err());

        let registry = Registry::new("ftp", RegistryType::HARBOR, "ftp://example.com");
        assert!(registry.validate().is_err());

        let registry = Registry::new("harbor", RegistryType::HARBOR, "https://harbor.example.com")
            .with_credential(Credential::basic("", "secret"));
        assert!(registry.validate().is_err());

        let registry = Registry::new("harbor", RegistryType::HARBOR, "https://harbor.example.com")
            .with_credential(Credential::secret("internal"));
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let debug = format!("{:?}", Credential::basic("admin", "Harbor12345"));
        assert!(debug.contains("admin"));
        assert!(!debug.contains("Harbor12345"));
    }
}
