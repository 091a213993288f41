//! Process configuration read from the environment
//!
//! The replication core is embedded in a job service; everything it needs from
//! its host process arrives through environment variables. [`ReplicationConfig`]
//! collects them once, applies defaults and validates the combination.

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_INTERNAL_TLS_ENABLED: &str = "INTERNAL_TLS_ENABLED";
pub const ENV_INTERNAL_VERIFY_CLIENT_CERT: &str = "INTERNAL_VERIFY_CLIENT_CERT";
pub const ENV_INTERNAL_TLS_KEY_PATH: &str = "INTERNAL_TLS_KEY_PATH";
pub const ENV_INTERNAL_TLS_CERT_PATH: &str = "INTERNAL_TLS_CERT_PATH";
pub const ENV_INTERNAL_TLS_TRUST_CA_PATH: &str = "INTERNAL_TLS_TRUST_CA_PATH";
pub const ENV_CORE_URL: &str = "CORE_URL";
pub const ENV_EXT_ENDPOINT: &str = "EXT_ENDPOINT";
pub const ENV_COPY_BLOB_RETRY_COUNT: &str = "COPY_BLOB_RETRY_COUNT";
pub const ENV_MAX_CONCURRENCY: &str = "REPLICATION_MAX_CONCURRENCY";
pub const ENV_TOKEN_CACHE_CAPACITY: &str = "TOKEN_CACHE_CAPACITY";

pub const DEFAULT_BLOB_COPY_RETRY: u32 = 5;
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_TOKEN_CACHE_CAPACITY: usize = 100;

const DEFAULT_KEY_PATH: &str = "/etc/harbor/ssl/job_service.key";
const DEFAULT_CERT_PATH: &str = "/etc/harbor/ssl/job_service.crt";
const DEFAULT_TRUST_CA_PATH: &str = "/etc/harbor/ssl/harbor_internal_ca.crt";

/// Endpoints under which the local instance is reachable from inside its own network
const LOCAL_REGISTRY_URLS: [&str; 4] = [
    "http://registry:5000",
    "https://registry:5443",
    "http://core:8080",
    "https://core:10443",
];

/// TLS material for talking to components of the local instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTlsConfig {
    pub enabled: bool,
    pub verify_client_cert: bool,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub trust_ca_path: PathBuf,
}

impl Default for InternalTlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify_client_cert: false,
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
            cert_path: PathBuf::from(DEFAULT_CERT_PATH),
            trust_ca_path: PathBuf::from(DEFAULT_TRUST_CA_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub internal_tls: InternalTlsConfig,
    /// URL of the local core service, used to recognize the local instance
    pub core_url: Option<String>,
    /// External endpoint of the local instance; set only inside the core process
    pub ext_endpoint: Option<String>,
    /// Attempts per blob copy before the artifact copy fails
    pub blob_copy_retry: u32,
    /// Worker count for adapter-side fan-out
    pub max_concurrency: usize,
    pub token_cache_capacity: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            internal_tls: InternalTlsConfig::default(),
            core_url: None,
            ext_endpoint: None,
            blob_copy_retry: DEFAULT_BLOB_COPY_RETRY,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            token_cache_capacity: DEFAULT_TOKEN_CACHE_CAPACITY,
        }
    }
}

impl ReplicationConfig {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(value) = non_empty(ENV_INTERNAL_TLS_ENABLED) {
            config.internal_tls.enabled = parse_bool(&value);
        }
        if let Some(value) = non_empty(ENV_INTERNAL_VERIFY_CLIENT_CERT) {
            config.internal_tls.verify_client_cert = parse_bool(&value);
        }
        if let Some(value) = non_empty(ENV_INTERNAL_TLS_KEY_PATH) {
            config.internal_tls.key_path = PathBuf::from(value);
        }
        if let Some(value) = non_empty(ENV_INTERNAL_TLS_CERT_PATH) {
            config.internal_tls.cert_path = PathBuf::from(value);
        }
        if let Some(value) = non_empty(ENV_INTERNAL_TLS_TRUST_CA_PATH) {
            config.internal_tls.trust_ca_path = PathBuf::from(value);
        }
        config.core_url = non_empty(ENV_CORE_URL).map(|v| v.trim_end_matches('/').to_string());
        config.ext_endpoint = non_empty(ENV_EXT_ENDPOINT);

        // a non-positive or garbled retry count falls back to the default
        config.blob_copy_retry = non_empty(ENV_COPY_BLOB_RETRY_COUNT)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .map(|v| v.min(u32::MAX as i64) as u32)
            .unwrap_or(DEFAULT_BLOB_COPY_RETRY);

        if let Some(value) = non_empty(ENV_MAX_CONCURRENCY).and_then(|v| v.parse::<usize>().ok()) {
            config.max_concurrency = value;
        }
        if let Some(value) = non_empty(ENV_TOKEN_CACHE_CAPACITY).and_then(|v| v.parse::<usize>().ok()) {
            config.token_cache_capacity = value;
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(ReplicationError::invalid("max concurrency must be greater than zero"));
        }
        if self.token_cache_capacity == 0 {
            return Err(ReplicationError::invalid("token cache capacity must be greater than zero"));
        }
        if self.internal_tls.enabled && self.internal_tls.trust_ca_path.as_os_str().is_empty() {
            return Err(ReplicationError::invalid(
                "internal TLS is enabled but no trust CA path is configured",
            ));
        }
        if self.internal_tls.verify_client_cert
            && (self.internal_tls.key_path.as_os_str().is_empty()
                || self.internal_tls.cert_path.as_os_str().is_empty())
        {
            return Err(ReplicationError::invalid(
                "client certificate verification requires both key and certificate paths",
            ));
        }
        if let Some(core_url) = &self.core_url {
            url::Url::parse(core_url)?;
        }
        Ok(())
    }

    /// Whether the URL points at the local instance
    pub fn is_local_registry(&self, url: &str) -> bool {
        let url = url.trim_end_matches('/');
        if let Some(core_url) = &self.core_url {
            if core_url == url {
                return true;
            }
        }
        LOCAL_REGISTRY_URLS.contains(&url)
    }

    /// Presence of `EXT_ENDPOINT` means the code runs inside the core process
    pub fn running_in_core(&self) -> bool {
        self.ext_endpoint.is_some()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::from_lookup(|_| None);
        assert_eq!(config, ReplicationConfig::default());
        assert_eq!(config.blob_copy_retry, 5);
        assert!(!config.running_in_core());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_count_fallback() {
        for raw in ["0", "-3", "abc", ""] {
            let config = ReplicationConfig::from_lookup(lookup(&[(ENV_COPY_BLOB_RETRY_COUNT, raw)]));
            assert_eq!(config.blob_copy_retry, DEFAULT_BLOB_COPY_RETRY, "raw value {:?}", raw);
        }
        let config = ReplicationConfig::from_lookup(lookup(&[(ENV_COPY_BLOB_RETRY_COUNT, "2")]));
        assert_eq!(config.blob_copy_retry, 2);
    }

    #[test]
    fn test_internal_tls_flags() {
        let config = ReplicationConfig::from_lookup(lookup(&[
            (ENV_INTERNAL_TLS_ENABLED, "TRUE"),
            (ENV_INTERNAL_VERIFY_CLIENT_CERT, "1"),
            (ENV_INTERNAL_TLS_TRUST_CA_PATH, "/tmp/ca.crt"),
        ]));
        assert!(config.internal_tls.enabled);
        assert!(config.internal_tls.verify_client_cert);
        assert_eq!(config.internal_tls.trust_ca_path, PathBuf::from("/tmp/ca.crt"));
        assert_eq!(config.internal_tls.key_path, PathBuf::from(DEFAULT_KEY_PATH));
    }

    #[test]
    fn test_local_registry_detection() {
        let config = ReplicationConfig::from_lookup(lookup(&[
            (ENV_CORE_URL, "http://harbor-core:8080/"),
            (ENV_EXT_ENDPOINT, "https://harbor.example.com"),
        ]));
        assert!(config.is_local_registry("http://harbor-core:8080"));
        assert!(config.is_local_registry("http://registry:5000/"));
        assert!(!config.is_local_registry("https://registry-1.docker.io"));
        assert!(config.running_in_core());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ReplicationConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
