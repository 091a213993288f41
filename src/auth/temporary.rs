//! Short-lived docker credentials minted by a vendor API
//!
//! Cloud registries (ECR, ACR, ACR-EE, TCR) exchange the account's API keys
//! for a registry user/password that expires. [`TemporaryCredential`] keeps
//! the current pair and asks its [`CredentialSource`] for a fresh one when
//! the pair is about to expire.

use crate::auth::cache::LATENCY_GRACE_SECS;
use crate::auth::credential::BasicAuthCredential;
use crate::error::Result;
use crate::http::Modifier;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Request;
use reqwest::header::AUTHORIZATION;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct DockerCredential {
    pub username: String,
    pub password: String,
    pub expires_at: DateTime<Utc>,
}

impl DockerCredential {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(LATENCY_GRACE_SECS) > now
    }
}

impl std::fmt::Debug for DockerCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerCredential")
            .field("username", &self.username)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<DockerCredential>;
}

/// Basic credential backed by a [`CredentialSource`], refreshed on expiry
pub struct TemporaryCredential<S> {
    source: S,
    current: Mutex<Option<DockerCredential>>,
}

impl<S: CredentialSource> TemporaryCredential<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The cached pair, or a fresh one when it is missing or stale
    pub async fn credential(&self) -> Result<DockerCredential> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref().filter(|c| c.is_fresh(Utc::now())) {
            return Ok(credential.clone());
        }
        let credential = self.source.fetch().await?;
        tracing::debug!(username = %credential.username, expires_at = %credential.expires_at, "refreshed temporary credential");
        *current = Some(credential.clone());
        Ok(credential)
    }
}

#[async_trait]
impl<S: CredentialSource> Modifier for TemporaryCredential<S> {
    async fn modify(&self, request: &mut Request) -> Result<()> {
        let credential = self.credential().await?;
        let header = BasicAuthCredential::new(credential.username, credential.password).header_value()?;
        request.headers_mut().insert(AUTHORIZATION, header);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        lifetime: i64,
    }

    #[async_trait]
    impl CredentialSource for Counting {
        async fn fetch(&self) -> Result<DockerCredential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DockerCredential {
                username: "user".to_string(),
                password: format!("pass{}", n),
                expires_at: Utc::now() + Duration::seconds(self.lifetime),
            })
        }
    }

    #[tokio::test]
    async fn test_reuses_fresh_credential() {
        let credential = TemporaryCredential::new(Counting {
            calls: AtomicUsize::new(0),
            lifetime: 3600,
        });
        let mut request = Request::new(Method::GET, "https://r.example.com/v2/".parse().unwrap());
        credential.modify(&mut request).await.unwrap();
        credential.modify(&mut request).await.unwrap();
        assert_eq!(credential.source().calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Basic dXNlcjpwYXNzMA=="
        );
    }

    #[tokio::test]
    async fn test_refreshes_within_grace_period() {
        let credential = TemporaryCredential::new(Counting {
            calls: AtomicUsize::new(0),
            lifetime: LATENCY_GRACE_SECS - 1,
        });
        credential.credential().await.unwrap();
        let second = credential.credential().await.unwrap();
        assert_eq!(second.password, "pass1");
    }
}
