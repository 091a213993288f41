//! `WWW-Authenticate` challenge parsing

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lowercased scheme, e.g. `bearer` or `basic`
    pub scheme: String,
    /// Parameter names are lowercased
    pub parameters: HashMap<String, String>,
}

impl Challenge {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn is_bearer(&self) -> bool {
        self.scheme == "bearer"
    }

    pub fn is_basic(&self) -> bool {
        self.scheme == "basic"
    }
}

/// Parses one or more challenges. Quoted values may contain commas.
pub fn parse_challenges(header: &str) -> Vec<Challenge> {
    let mut challenges: Vec<Challenge> = Vec::new();
    for part in split_auth_params(header) {
        // a part either starts a new challenge ("Bearer realm=...") or continues the current one
        let (scheme, param) = match part.split_once(char::is_whitespace) {
            Some((head, rest)) if !head.contains('=') => (Some(head), rest.trim()),
            _ if !part.contains('=') => (Some(part), ""),
            _ => (None, part),
        };
        if let Some(scheme) = scheme {
            challenges.push(Challenge {
                scheme: scheme.to_ascii_lowercase(),
                parameters: HashMap::new(),
            });
        }
        if let (Some(current), Some((key, value))) = (challenges.last_mut(), param.split_once('=')) {
            current
                .parameters
                .insert(key.trim().to_ascii_lowercase(), unquote(value.trim()));
        }
    }
    challenges
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    inner.replace("\\\"", "\"")
}

/// Split auth header parameters, respecting quoted values
fn split_auth_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        match ch {
            '\\' if in_quotes => {
                escaped = !escaped;
                continue;
            }
            '"' if !escaped => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        escaped = false;
    }
    if start < s.len() {
        parts.push(s[start..].trim());
    }
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}
