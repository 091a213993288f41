//! OCI distribution client
//!
//! [`Client`] talks to one registry endpoint through an [`HttpClient`] whose
//! modifier chain carries the authorizer. Per-repository operations live on
//! [`Repository`] handles, created once per name and shared.

pub mod manifest;
pub mod operations;

pub use manifest::{Descriptor, Manifest};
pub use operations::blob::BlobStream;

use crate::error::Result;
use crate::http::HttpClient;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base: String,
    base_url: Url,
    http: HttpClient,
    repositories: RwLock<HashMap<String, Arc<Repository>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("url", &self.inner.base).finish()
    }
}

impl Client {
    pub fn new(url: &str, http: HttpClient) -> Result<Self> {
        let base = url.trim_end_matches('/').to_string();
        let base_url = Url::parse(&base)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                base,
                base_url,
                http,
                repositories: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Base URL without a trailing slash
    pub fn url(&self) -> &str {
        &self.inner.base
    }

    pub fn http(&self) -> &HttpClient {
        &self.inner.http
    }

    /// Handle for one repository, shared between callers
    pub fn repository(&self, name: &str) -> Arc<Repository> {
        if let Some(repository) = self.inner.repositories.read().get(name) {
            return repository.clone();
        }
        let mut repositories = self.inner.repositories.write();
        repositories
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Repository {
                    name: name.to_string(),
                    base: self.inner.base.clone(),
                    base_url: self.inner.base_url.clone(),
                    http: self.inner.http.clone(),
                })
            })
            .clone()
    }
}

/// Distribution operations scoped to one repository
#[derive(Debug)]
pub struct Repository {
    name: String,
    base: String,
    base_url: Url,
    http: HttpClient,
}

impl Repository {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/v2/{}/{}", self.base, self.name, suffix)
    }
}
