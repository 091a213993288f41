//! Authentication pipeline
//!
//! Credentials are request [`Modifier`]s. [`authorizer_for`] builds the
//! standard chain element for a registry: a [`BearerAuthorizer`] that
//! discovers the challenge and wraps the registry's credential.

pub mod bearer;
pub mod cache;
pub mod challenge;
pub mod credential;
pub mod oauth2;
pub mod scope;
pub mod temporary;

pub use bearer::BearerAuthorizer;
pub use cache::{Token, TokenCache};
pub use challenge::{Challenge, parse_challenges};
pub use credential::{BasicAuthCredential, SecretAuthorizer};
pub use oauth2::{OAuth2Authorizer, ServiceAccountKey, parse_google_credentials};
pub use scope::{ACTION_ALL, ACTION_PULL, ACTION_PUSH, Scope, parse_scopes, scopes_key};
pub use temporary::{CredentialSource, DockerCredential, TemporaryCredential};

use crate::error::Result;
use crate::http::Modifier;
use crate::model::{CredentialType, Registry};
use std::sync::Arc;

/// The registry credential as a modifier, if it carries anything
pub fn credential_modifier(registry: &Registry) -> Option<Arc<dyn Modifier>> {
    let credential = registry.credential.as_ref()?;
    match credential.kind {
        CredentialType::Secret if !credential.access_secret.is_empty() => {
            Some(Arc::new(SecretAuthorizer::new(credential.access_secret.clone())))
        }
        CredentialType::Basic | CredentialType::OAuth
            if !credential.access_key.is_empty() || !credential.access_secret.is_empty() =>
        {
            Some(Arc::new(BasicAuthCredential::new(
                credential.access_key.clone(),
                credential.access_secret.clone(),
            )))
        }
        _ => None,
    }
}

/// Challenge-driven authorizer for the registry, wrapping an explicit credential
pub fn authorizer_for(
    registry: &Registry,
    client: reqwest::Client,
    credential: Option<Arc<dyn Modifier>>,
    cache_capacity: usize,
) -> Result<Arc<dyn Modifier>> {
    let authorizer = BearerAuthorizer::new(registry.parsed_url()?, client, credential, cache_capacity)
        .with_token_service_url(registry.token_service_url.clone());
    Ok(Arc::new(authorizer))
}
