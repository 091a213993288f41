//! Request modifiers
//!
//! Every outbound request passes through an ordered chain of modifiers before
//! it is sent. A modifier may rewrite headers or the URL, or abort the call by
//! returning an error.

use crate::error::{ReplicationError, Result};
use async_trait::async_trait;
use reqwest::Request;
use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};

#[async_trait]
pub trait Modifier: Send + Sync {
    async fn modify(&self, request: &mut Request) -> Result<()>;
}

/// Stamps the crate user agent
#[derive(Debug, Clone)]
pub struct UserAgentModifier {
    user_agent: HeaderValue,
}

impl UserAgentModifier {
    pub fn new(user_agent: &str) -> Result<Self> {
        Ok(Self {
            user_agent: HeaderValue::from_str(user_agent)?,
        })
    }
}

impl Default for UserAgentModifier {
    fn default() -> Self {
        Self {
            user_agent: HeaderValue::from_static(concat!("registry-replicator/", env!("CARGO_PKG_VERSION"))),
        }
    }
}

#[async_trait]
impl Modifier for UserAgentModifier {
    async fn modify(&self, request: &mut Request) -> Result<()> {
        request.headers_mut().insert(USER_AGENT, self.user_agent.clone());
        Ok(())
    }
}

/// Sets a fixed header on every request
#[derive(Debug, Clone)]
pub struct HeaderModifier {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderModifier {
    pub fn new(name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ReplicationError::invalid(format!("invalid header name {}: {}", name, e)))?;
        let mut value = HeaderValue::from_str(value)?;
        value.set_sensitive(true);
        Ok(Self { name, value })
    }
}

#[async_trait]
impl Modifier for HeaderModifier {
    async fn modify(&self, request: &mut Request) -> Result<()> {
        request.headers_mut().insert(self.name.clone(), self.value.clone());
        Ok(())
    }
}
