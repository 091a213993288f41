//! Docker Hub REST client
//!
//! Logs in once with `POST /v2/users/login/` and sends the returned JWT as
//! `Authorization: JWT {token}`. Every call goes through
//! [`Client::limit_aware_do`], which keeps clear of the Hub rate limit.

use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::http::HttpClient;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;

pub const LOGIN_PATH: &str = "/v2/users/login/";
pub const LIST_NAMESPACES_PATH: &str = "/v2/repositories/namespaces";
pub const CREATE_NAMESPACE_PATH: &str = "/v2/orgs/";

/// Pause when fewer requests than this remain in the window
const LOW_MARK: i64 = 8;
const MAX_ATTEMPTS: u32 = 3;

pub fn namespace_path(namespace: &str) -> String {
    format!("/v2/orgs/{}/", namespace)
}

pub fn list_repos_path(namespace: &str, page: u32, page_size: u32) -> String {
    format!("/v2/repositories/{}/?page={}&page_size={}", namespace, page, page_size)
}

pub fn list_tags_path(namespace: &str, repository: &str, page: u32, page_size: u32) -> String {
    format!(
        "/v2/repositories/{}/{}/tags/?page={}&page_size={}",
        namespace, repository, page, page_size
    )
}

pub fn delete_tag_path(namespace: &str, repository: &str, tag: &str) -> String {
    format!("/v2/repositories/{}/{}/tags/{}/", namespace, repository, tag)
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Serialize)]
pub struct NewOrgRequest {
    #[serde(rename = "orgname")]
    pub name: String,
    pub full_name: String,
    pub company: String,
}

#[derive(Debug, Deserialize)]
pub struct NamespacesResponse {
    #[serde(default)]
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repo {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// One page of a Hub listing; `next` is empty on the last page
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.next.as_deref().is_none_or(str::is_empty)
    }
}

pub struct Client {
    http: HttpClient,
    host: String,
    credential: Option<(String, String)>,
    token: OnceCell<Option<String>>,
}

impl Client {
    pub fn new(http: HttpClient, host: &str, credential: Option<(String, String)>) -> Self {
        Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            credential,
            token: OnceCell::new(),
        }
    }

    /// JWT of the logged-in user; anonymous clients have none
    async fn token(&self) -> Result<Option<&String>> {
        let token = self
            .token
            .get_or_try_init(|| async {
                let Some((username, password)) = &self.credential else {
                    return Ok(None);
                };
                let builder = self
                    .http
                    .request(Method::POST, &format!("{}{}", self.host, LOGIN_PATH))
                    .json(&LoginRequest { username, password });
                let response = self.http.execute(builder).await?;
                let login: LoginResponse = serde_json::from_slice(&response.bytes().await?)?;
                tracing::debug!(username, "logged in to Docker Hub");
                Ok::<_, ReplicationError>(Some(login.token))
            })
            .await?;
        Ok(token.as_ref())
    }

    /// One request, whatever the status
    pub async fn send(&self, method: Method, path: &str, body: Option<&serde_json::Value>) -> Result<Response> {
        let mut builder = self.http.request(method, &format!("{}{}", self.host, path));
        if let Some(token) = self.token().await? {
            builder = builder.header(AUTHORIZATION, format!("JWT {}", token));
        }
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").json(body);
        }
        self.http.send(builder).await
    }

    /// Sends the request while respecting the Hub rate limit.
    ///
    /// When the window is nearly exhausted the call sleeps until
    /// `x-ratelimit-reset` before returning. A 429 is retried after
    /// `retry-after` (seconds or an HTTP date), three attempts in total.
    pub async fn limit_aware_do(&self, method: Method, path: &str, body: Option<&serde_json::Value>) -> Result<Response> {
        for _ in 0..MAX_ATTEMPTS {
            let response = self.send(method.clone(), path, body).await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                if let Some(wait) = low_mark_wait(response.headers(), Utc::now()) {
                    tracing::info!(seconds = wait.as_secs_f64(), "rate-limit exhaustion imminent, sleeping");
                    tokio::time::sleep(wait).await;
                    tracing::info!("sleep finished, resuming operation");
                }
                return Ok(response);
            }
            let wait = retry_after(response.headers(), Utc::now()).ok_or_else(|| {
                ReplicationError::protocol("blocked by dockerhub rate-limit and missing retry-after header")
            })?;
            tracing::info!(seconds = wait.as_secs_f64(), "rate-limit exhausted, sleeping");
            tokio::time::sleep(wait).await;
            tracing::info!("sleep finished, resuming operation");
        }
        Err(ReplicationError::protocol("unable to get past dockerhub rate-limit"))
    }

    /// Rate-limited request with non-2xx mapped to errors
    pub async fn execute(&self, method: Method, path: &str, body: Option<&serde_json::Value>) -> Result<Response> {
        let response = self.limit_aware_do(method, path, body).await?;
        HttpErrorHandler::check(response).await
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(Method::GET, path, None).await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or_default()
}

/// Sleep needed before the next request when the window runs low
fn low_mark_wait(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let remaining = header_i64(headers, "x-ratelimit-remaining")?;
    if remaining >= LOW_MARK {
        return None;
    }
    let reset = DateTime::from_timestamp(header_i64(headers, "x-ratelimit-reset")?, 0)?;
    Some(until(reset, now))
}

/// `retry-after` as a delay in seconds or an HTTP date
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(seconds) = header_i64(headers, "retry-after") {
        return Some(Duration::from_secs(seconds.max(0) as u64));
    }
    let value = headers.get("retry-after")?.to_str().ok()?;
    let date = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    Some(until(date.with_timezone(&Utc), now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_retry_after_forms() {
        let now = DateTime::parse_from_rfc2822("Sun, 06 Nov 1994 08:49:37 GMT")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(retry_after(&headers(&[("retry-after", "12")]), now), Some(Duration::from_secs(12)));
        assert_eq!(
            retry_after(&headers(&[("retry-after", "Sun, 06 Nov 1994 08:50:37 GMT")]), now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(retry_after(&headers(&[]), now), None);
    }

    #[test]
    fn test_low_mark() {
        let now = DateTime::from_timestamp(1_000, 0).unwrap();
        let plenty = headers(&[("x-ratelimit-remaining", "100"), ("x-ratelimit-reset", "1010")]);
        assert_eq!(low_mark_wait(&plenty, now), None);
        let low = headers(&[("x-ratelimit-remaining", "3"), ("x-ratelimit-reset", "1010")]);
        assert_eq!(low_mark_wait(&low, now), Some(Duration::from_secs(10)));
        let past = headers(&[("x-ratelimit-remaining", "3"), ("x-ratelimit-reset", "900")]);
        assert_eq!(low_mark_wait(&past, now), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_login_and_retry_on_429() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"jwt-token"}"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/repositories/namespaces"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/repositories/namespaces"))
            .and(header("authorization", "JWT jwt-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"namespaces":["team"]}"#))
            .mount(&server)
            .await;

        let client = Client::new(
            HttpClient::new(reqwest::Client::new()),
            &server.uri(),
            Some(("user".into(), "pass".into())),
        );
        let namespaces: NamespacesResponse = client.get_json(LIST_NAMESPACES_PATH).await.unwrap();
        assert_eq!(namespaces.namespaces, vec!["team"]);
    }

    #[tokio::test]
    async fn test_gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(3)
            .mount(&server)
            .await;
        let client = Client::new(HttpClient::new(reqwest::Client::new()), &server.uri(), None);
        assert!(client.limit_aware_do(Method::GET, "/v2/x", None).await.is_err());
    }
}
