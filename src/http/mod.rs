//! HTTP substrate: shared transports, the modifier chain and pagination

pub mod modifier;
pub mod transport;

pub use modifier::{HeaderModifier, Modifier, UserAgentModifier};
pub use transport::TransportFactory;

use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::util::link::next_link;
use reqwest::header::LINK;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

/// HTTP client that runs every request through a modifier chain
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    modifiers: Vec<Arc<dyn Modifier>>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("modifiers", &self.modifiers.len())
            .finish()
    }
}

impl HttpClient {
    /// Client with the user-agent modifier at the head of the chain
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            modifiers: vec![Arc::new(UserAgentModifier::default())],
        }
    }

    pub fn with_modifier(mut self, modifier: Arc<dyn Modifier>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn with_modifiers(mut self, modifiers: impl IntoIterator<Item = Arc<dyn Modifier>>) -> Self {
        self.modifiers.extend(modifiers);
        self
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Applies the modifier chain and sends, whatever the response status
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let mut request = builder.build()?;
        for modifier in &self.modifiers {
            modifier.modify(&mut request).await?;
        }
        tracing::trace!(method = %request.method(), url = %request.url(), "sending request");
        Ok(self.client.execute(request).await?)
    }

    /// Like [`HttpClient::send`] but maps non-2xx responses to errors
    pub async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self.send(builder).await?;
        HttpErrorHandler::check(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.execute(self.get(url)).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Follows `Link: <..>; rel="next"` from `url`, decoding each page with `decode`
    pub async fn paginate<T, F>(&self, url: &str, decode: F) -> Result<Vec<T>>
    where
        F: Fn(&[u8]) -> Result<Vec<T>>,
    {
        let mut items = Vec::new();
        let mut current = Some(Url::parse(url)?);
        while let Some(page_url) = current.take() {
            let response = self.execute(self.get(page_url.as_str())).await?;
            let next = response
                .headers()
                .get(LINK)
                .map(|value| value.to_str())
                .transpose()?
                .and_then(next_link);
            let body = response.bytes().await?;
            items.extend(decode(&body)?);
            if let Some(next) = next {
                current = Some(resolve(&page_url, &next)?);
            }
        }
        Ok(items)
    }
}

/// Resolves a possibly relative URL against the URL it was received from
pub fn resolve(base: &Url, reference: &str) -> Result<Url> {
    base.join(reference)
        .map_err(|e| ReplicationError::protocol(format!("invalid URL {} relative to {}: {}", reference, base, e)))
}
