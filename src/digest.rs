//! Content digest utilities
//!
//! Digests are `algorithm:encoded` strings. Manifest references are either a
//! tag or a digest, and a handful of operations (manifest deletion, DockerHub
//! tag removal, pull verification) behave differently for the two.

use crate::error::{ReplicationError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::Digest;

/// Digest of zero bytes
pub const EMPTY_DIGEST: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

static DIGEST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$").expect("static regex"));

/// Utilities for working with content digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute the hex SHA256 of the data
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute the `sha256:` digest of the data
    pub fn compute_digest(data: &[u8]) -> String {
        format!("sha256:{}", Self::compute_sha256(data))
    }

    /// Whether the reference parses as a digest rather than a tag
    pub fn is_digest(reference: &str) -> bool {
        if !DIGEST_RE.is_match(reference) {
            return false;
        }
        match reference.split_once(':') {
            Some(("sha256", hex_part)) => is_hex_of_len(hex_part, 64),
            Some(("sha512", hex_part)) => is_hex_of_len(hex_part, 128),
            Some(_) => true,
            None => false,
        }
    }

    /// Rejects anything that is not a well-formed digest
    pub fn validate(digest: &str) -> Result<()> {
        if Self::is_digest(digest) {
            Ok(())
        } else {
            Err(ReplicationError::protocol(format!("invalid digest: {}", digest)))
        }
    }

    /// Verify data matches the expected digest. Only sha256 can be recomputed; other
    /// algorithms pass through unchecked.
    pub fn verify(data: &[u8], expected: &str) -> Result<()> {
        Self::validate(expected)?;
        if let Some(hex_part) = expected.strip_prefix("sha256:") {
            let computed = Self::compute_sha256(data);
            if computed != hex_part {
                return Err(ReplicationError::protocol(format!(
                    "digest mismatch: expected {}, computed sha256:{}",
                    expected, computed
                )));
            }
        }
        Ok(())
    }
}

fn is_hex_of_len(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_digest() {
        assert_eq!(
            DigestUtils::compute_digest(b"hello world"),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(DigestUtils::compute_digest(b""), EMPTY_DIGEST);
    }

    #[test]
    fn test_is_digest() {
        assert!(DigestUtils::is_digest(EMPTY_DIGEST));
        assert!(!DigestUtils::is_digest("latest"));
        assert!(!DigestUtils::is_digest("v1.0"));
        assert!(!DigestUtils::is_digest("sha256:invalid"));
        assert!(!DigestUtils::is_digest(
            "sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        ));
    }

    #[test]
    fn test_verify() {
        let digest = DigestUtils::compute_digest(b"payload");
        assert!(DigestUtils::verify(b"payload", &digest).is_ok());
        assert!(DigestUtils::verify(b"other", &digest).is_err());
        assert!(DigestUtils::verify(b"payload", "latest").is_err());
    }
}
