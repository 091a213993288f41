//! OAuth2 access tokens from a Google service-account key
//!
//! The key's `client_email` signs an RS256 assertion that the key's
//! `token_uri` exchanges for a short-lived access token. The token goes out
//! as `Authorization: Bearer <token>` on every request.

use crate::auth::cache::LATENCY_GRACE_SECS;
use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::http::Modifier;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jaws::claims::{Claims, RegisteredClaims};
use jaws::crypto::rsa;
use jaws::token::Token;
use reqwest::Request;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use rsa::pkcs8::DecodePrivateKey;
use rsa::sha2::Sha256;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account JSON key this crate reads
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

/// Project of a service-account key; the key must name one
pub fn parse_google_credentials(json: &str) -> Result<ServiceAccountKey> {
    let key: ServiceAccountKey = serde_json::from_str(json)
        .map_err(|e| ReplicationError::invalid(format!("invalid service account key: {}", e)))?;
    if key.project_id.is_empty() {
        return Err(ReplicationError::invalid("service account key has no project_id"));
    }
    Ok(key)
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Bearer modifier minting access tokens with a service-account key
pub struct OAuth2Authorizer {
    key: ServiceAccountKey,
    signer: rsa::pkcs1v15::SigningKey<Sha256>,
    scopes: Vec<String>,
    client: reqwest::Client,
    current: Mutex<Option<AccessToken>>,
}

impl OAuth2Authorizer {
    pub fn new(client: reqwest::Client, key_json: &str, scopes: &[&str]) -> Result<Self> {
        let key: ServiceAccountKey = serde_json::from_str(key_json)
            .map_err(|e| ReplicationError::invalid(format!("invalid service account key: {}", e)))?;
        if key.client_email.is_empty() || key.private_key.is_empty() {
            return Err(ReplicationError::invalid(
                "service account key needs client_email and private_key",
            ));
        }
        let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(&key.private_key)
            .map_err(|e| ReplicationError::invalid(format!("invalid service account private key: {}", e)))?;
        Ok(Self {
            key,
            signer: rsa::pkcs1v15::SigningKey::new(private_key),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            client,
            current: Mutex::new(None),
        })
    }

    pub fn scheme(&self) -> &'static str {
        "bearer"
    }

    /// Signed JWT asserting the service account identity
    fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims: Claims<serde_json::Value> = Claims {
            registered: RegisteredClaims {
                issuer: Some(self.key.client_email.clone()),
                audience: Some(self.key.token_uri.clone()),
                issued_at: Some(now),
                expiration: Some(now + Duration::seconds(ASSERTION_LIFETIME_SECS)),
                ..Default::default()
            },
            claims: json!({ "scope": self.scopes.join(" ") }),
        };
        let token = Token::compact((), claims)
            .sign::<rsa::pkcs1v15::SigningKey<Sha256>, rsa::pkcs1v15::Signature>(&self.signer)
            .map_err(|e| ReplicationError::Fatal(format!("failed to sign service account assertion: {}", e)))?;
        token
            .rendered()
            .map_err(|e| ReplicationError::Fatal(format!("failed to encode service account assertion: {}", e)))
    }

    async fn exchange(&self) -> Result<AccessToken> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let response = HttpErrorHandler::check(response).await?;
        let body = response.bytes().await?;
        let token: AccessTokenResponse = serde_json::from_slice(&body)?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }

    /// The cached access token, or a fresh one when missing or about to expire
    pub async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        let now = Utc::now();
        if let Some(token) = current
            .as_ref()
            .filter(|t| t.expires_at - Duration::seconds(LATENCY_GRACE_SECS) > now)
        {
            return Ok(token.value.clone());
        }
        let token = self.exchange().await?;
        tracing::debug!(account = %self.key.client_email, expires_at = %token.expires_at, "obtained oauth2 access token");
        *current = Some(token.clone());
        Ok(token.value)
    }
}

#[async_trait]
impl Modifier for OAuth2Authorizer {
    async fn modify(&self, request: &mut Request) -> Result<()> {
        let token = self.access_token().await?;
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ReplicationError::protocol(format!("invalid access token: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}
