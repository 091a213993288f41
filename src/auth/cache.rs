//! Bounded token cache with expiry-aware eviction

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Seconds subtracted from a token's lifetime so it never expires mid-request
pub const LATENCY_GRACE_SECS: i64 = 10;

/// Lifetime assumed when the token service omits `expires_in`
pub const DEFAULT_EXPIRES_IN: i64 = 60;

/// Token envelope returned by OAuth2-style token services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub issued_at: String,
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN
}

impl Token {
    pub fn new(token: impl Into<String>, expires_in: i64, issued_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            access_token: String::new(),
            expires_in,
            issued_at: issued_at.to_rfc3339(),
        }
    }

    /// Adopts `access_token` when `token` is empty and fills in a missing issue time
    pub fn normalize(mut self, fetched_at: DateTime<Utc>) -> Self {
        if self.token.is_empty() && !self.access_token.is_empty() {
            self.token = std::mem::take(&mut self.access_token);
        }
        if self.expires_in <= 0 {
            self.expires_in = DEFAULT_EXPIRES_IN;
        }
        if self.issued_at.is_empty() {
            self.issued_at = fetched_at.to_rfc3339();
        }
        self
    }

    /// `issued_at + expires_in - grace`, or `None` when the issue time does not parse
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let issued_at = DateTime::parse_from_rfc3339(&self.issued_at).ok()?.with_timezone(&Utc);
        Some(issued_at + Duration::seconds(self.expires_in - LATENCY_GRACE_SECS))
    }

    /// Unparseable issue times count as expired
    pub fn is_expired(&self) -> bool {
        self.expires_at().is_none_or(|at| at < Utc::now())
    }
}

/// Capacity-bounded map from scope key to token, shared across requests
#[derive(Debug)]
pub struct TokenCache {
    capacity: usize,
    tokens: RwLock<HashMap<String, Token>>,
}

impl TokenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// The cached token for the key, unless it has expired
    pub fn get(&self, key: &str) -> Option<Token> {
        let tokens = self.tokens.read();
        tokens.get(key).filter(|t| !t.is_expired()).cloned()
    }

    /// Inserts the token. At capacity, every expired entry is evicted first;
    /// when none is expired the single earliest-expiring entry goes.
    pub fn set(&self, key: impl Into<String>, token: Token) {
        let key = key.into();
        let mut tokens = self.tokens.write();
        if tokens.len() >= self.capacity && !tokens.contains_key(&key) {
            let now = Utc::now();
            let mut candidates = Vec::new();
            let mut earliest: Option<(&String, DateTime<Utc>)> = None;
            for (k, t) in tokens.iter() {
                match t.expires_at() {
                    Some(at) if at >= now => {
                        if earliest.is_none_or(|(_, e)| at < e) {
                            earliest = Some((k, at));
                        }
                    }
                    _ => candidates.push(k.clone()),
                }
            }
            if candidates.is_empty() {
                if let Some((k, _)) = earliest {
                    candidates.push(k.clone());
                }
            }
            for k in candidates {
                tracing::debug!(key = %k, "evicting token from cache");
                tokens.remove(&k);
            }
        }
        tokens.insert(key, token);
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tokens.read().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: i64, issued_secs_ago: i64) -> Token {
        Token::new("t", expires_in, Utc::now() - Duration::seconds(issued_secs_ago))
    }

    #[test]
    fn test_expiry_includes_grace() {
        assert!(!token(60, 0).is_expired());
        assert!(token(10, 1).is_expired());
        let broken = Token {
            issued_at: "yesterday".into(),
            ..token(60, 0)
        };
        assert!(broken.is_expired());
    }

    #[test]
    fn test_normalize_adopts_access_token() {
        let raw: Token = serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        let now = Utc::now();
        let token = raw.normalize(now);
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_in, DEFAULT_EXPIRES_IN);
        assert_eq!(token.issued_at, now.to_rfc3339());
    }

    #[test]
    fn test_get_skips_expired() {
        let cache = TokenCache::new(4);
        cache.set("a", token(5, 0));
        cache.set("b", token(300, 0));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_none());
    }

    #[test]
    fn test_expired_entries_are_evicted_together() {
        let cache = TokenCache::new(2);
        cache.set("s1", token(5, 100));
        cache.set("s2", token(5, 100));
        cache.set("s3", token(300, 0));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("s3"));
    }

    #[test]
    fn test_earliest_expiry_is_evicted() {
        let cache = TokenCache::new(2);
        cache.set("s1", token(300, 0));
        cache.set("s2", token(200, 0));
        cache.set("s3", token(400, 0));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("s1"));
        assert!(!cache.contains("s2"));
        assert!(cache.contains("s3"));
    }

    #[test]
    fn test_eviction_scenario() {
        // t1 was issued a second ago with a 10 s lifetime, so it is past its grace window
        let cache = TokenCache::new(2);
        cache.set("S1", token(10, 1));
        cache.set("S2", token(15, 1));
        cache.set("S3", token(15, 0));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("S1"));
        assert!(cache.contains("S2"));
        assert!(cache.contains("S3"));
    }
}
