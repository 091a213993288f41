//! Token scopes derived from distribution API requests

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use std::fmt;
use url::Url;

pub const SCOPE_TYPE_REPOSITORY: &str = "repository";
pub const SCOPE_TYPE_REGISTRY: &str = "registry";
pub const ACTION_PULL: &str = "pull";
pub const ACTION_PUSH: &str = "push";
pub const ACTION_ALL: &str = "*";

static CATALOG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/v2/_catalog$").expect("static regex"));
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/v2/(.+)/tags/list$").expect("static regex"));
static MANIFEST: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/v2/(.+)/manifests/[^/]+$").expect("static regex"));
static BLOB_UPLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/v2/(.+?)/blobs/uploads(/.*)?$").expect("static regex"));
static BLOB: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/v2/(.+)/blobs/[^/]+$").expect("static regex"));

/// `(type, name, actions)`, rendered as `type:name:a1,a2`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub scope_type: String,
    pub name: String,
    pub actions: Vec<String>,
}

impl Scope {
    pub fn repository(name: impl Into<String>, actions: &[&str]) -> Self {
        Self {
            scope_type: SCOPE_TYPE_REPOSITORY.to_string(),
            name: name.into(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn catalog() -> Self {
        Self {
            scope_type: SCOPE_TYPE_REGISTRY.to_string(),
            name: "catalog".to_string(),
            actions: vec![ACTION_ALL.to_string()],
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scope_type, self.name, self.actions.join(","))
    }
}

fn actions_for(method: &Method) -> &'static [&'static str] {
    match *method {
        Method::GET | Method::HEAD => &[ACTION_PULL],
        Method::POST | Method::PUT | Method::PATCH => &[ACTION_PULL, ACTION_PUSH],
        Method::DELETE => &[ACTION_ALL],
        _ => &[],
    }
}

/// Scopes needed by the request. The `/v2/` base and non-distribution paths need none.
pub fn parse_scopes(method: &Method, url: &Url) -> Vec<Scope> {
    let path = url.path().trim_end_matches('/');

    if CATALOG.is_match(path) {
        return vec![Scope::catalog()];
    }

    let mut scopes = Vec::new();
    let repository = if let Some(caps) = BLOB_UPLOAD.captures(path) {
        // cross-repository mount also needs pull on the source repository
        if let Some((_, from)) = url.query_pairs().find(|(k, _)| k == "from") {
            if !from.is_empty() {
                scopes.push(Scope::repository(from.into_owned(), &[ACTION_PULL]));
            }
        }
        caps.get(1).map(|m| m.as_str())
    } else if let Some(caps) = MANIFEST.captures(path) {
        caps.get(1).map(|m| m.as_str())
    } else if let Some(caps) = BLOB.captures(path) {
        caps.get(1).map(|m| m.as_str())
    } else if let Some(caps) = TAGS.captures(path) {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    };

    if let Some(repository) = repository {
        let actions = actions_for(method);
        if !actions.is_empty() {
            scopes.push(Scope::repository(repository, actions));
        }
    }
    scopes
}

/// Cache key of a scope set
pub fn scopes_key(scopes: &[Scope]) -> String {
    scopes.iter().map(Scope::to_string).collect::<Vec<_>>().join("#")
}
