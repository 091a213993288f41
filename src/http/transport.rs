//! Shared HTTP clients
//!
//! One [`TransportFactory`] is built per process from [`ReplicationConfig`]
//! and injected into every adapter factory. It owns the secure and the
//! insecure connection pools; `reqwest::Client` is reference counted, so
//! handing out clones shares the pools.

use crate::config::{InternalTlsConfig, ReplicationConfig};
use crate::error::{ReplicationError, Result};
use reqwest::{Certificate, Client, ClientBuilder, Identity};
use std::path::Path;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_IDLE_PER_HOST: usize = 100;

#[derive(Debug, Clone)]
pub struct TransportFactory {
    secure: Client,
    insecure: Client,
}

impl TransportFactory {
    pub fn new(config: &ReplicationConfig) -> Result<Self> {
        let mut secure = Self::base_builder();
        if config.internal_tls.enabled {
            secure = Self::with_internal_tls(secure, &config.internal_tls)?;
        }
        let secure = secure
            .build()
            .map_err(|e| ReplicationError::Fatal(format!("failed to build secure HTTP client: {}", e)))?;
        let insecure = Self::base_builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| ReplicationError::Fatal(format!("failed to build insecure HTTP client: {}", e)))?;
        Ok(Self { secure, insecure })
    }

    /// The shared client for the given verification mode
    pub fn client(&self, insecure: bool) -> Client {
        if insecure {
            self.insecure.clone()
        } else {
            self.secure.clone()
        }
    }

    /// A fresh client trusting only the CA bundle. An empty bundle returns the shared client.
    pub fn client_with_ca(&self, insecure: bool, ca_pem: &[u8]) -> Result<Client> {
        if ca_pem.iter().all(u8::is_ascii_whitespace) {
            return Ok(self.client(insecure));
        }
        let certificates = Certificate::from_pem_bundle(ca_pem)
            .map_err(|e| ReplicationError::invalid(format!("failed to parse CA bundle: {}", e)))?;
        if certificates.is_empty() {
            return Err(ReplicationError::invalid("no certificate found in CA bundle"));
        }
        let mut builder = Self::base_builder().tls_built_in_root_certs(false);
        for certificate in certificates {
            builder = builder.add_root_certificate(certificate);
        }
        if insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        builder
            .build()
            .map_err(|e| ReplicationError::Fatal(format!("failed to build HTTP client: {}", e)))
    }

    fn base_builder() -> ClientBuilder {
        Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
    }

    fn with_internal_tls(mut builder: ClientBuilder, tls: &InternalTlsConfig) -> Result<ClientBuilder> {
        let ca = read_pem(&tls.trust_ca_path)?;
        for certificate in Certificate::from_pem_bundle(&ca)
            .map_err(|e| ReplicationError::Fatal(format!("failed to parse internal CA: {}", e)))?
        {
            builder = builder.add_root_certificate(certificate);
        }
        if tls.verify_client_cert {
            let cert = read_pem(&tls.cert_path)?;
            let key = read_pem(&tls.key_path)?;
            let identity = Identity::from_pkcs8_pem(&cert, &key)
                .map_err(|e| ReplicationError::Fatal(format!("failed to load internal TLS key pair: {}", e)))?;
            builder = builder.identity(identity);
        }
        Ok(builder)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| ReplicationError::Fatal(format!("failed to read {}: {}", path.display(), e)))
}
