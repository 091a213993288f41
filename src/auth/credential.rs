//! Static credential modifiers

use crate::error::Result;
use crate::http::Modifier;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Request;
use reqwest::header::{AUTHORIZATION, HeaderValue};

/// `Authorization: Basic base64(user:password)`
#[derive(Clone)]
pub struct BasicAuthCredential {
    username: String,
    password: String,
}

impl BasicAuthCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn header_value(&self) -> Result<HeaderValue> {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl std::fmt::Debug for BasicAuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthCredential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Modifier for BasicAuthCredential {
    async fn modify(&self, request: &mut Request) -> Result<()> {
        request.headers_mut().insert(AUTHORIZATION, self.header_value()?);
        Ok(())
    }
}

/// Shared-secret authorization between components of the same instance
#[derive(Clone)]
pub struct SecretAuthorizer {
    secret: String,
}

pub const SECRET_PREFIX: &str = "Harbor-Secret ";

impl SecretAuthorizer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

#[async_trait]
impl Modifier for SecretAuthorizer {
    async fn modify(&self, request: &mut Request) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("{}{}", SECRET_PREFIX, self.secret))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}
