//! Request signing for cloud vendor APIs
//!
//! - Alibaba Cloud RPC signatures (ACR Enterprise Edition)
//! - Alibaba Cloud ROA signatures (ACR)
//! - Tencent Cloud TC3-HMAC-SHA256 (TCR)
//!
//! Each signer only computes headers or query strings; sending is left to
//! the adapter's [`HttpClient`](crate::http::HttpClient).

use crate::error::{ReplicationError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// RFC 3986 unreserved characters pass through; everything else is escaped
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, RFC3986).to_string()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| ReplicationError::Fatal(format!("HMAC-SHA256 key error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key)
        .map_err(|e| ReplicationError::Fatal(format!("HMAC-SHA1 key error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Value of the `host` header the client will send for `url`
pub fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| ReplicationError::invalid(format!("no host in {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// `k=v&k=v` over sorted, percent-encoded pairs
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Alibaba Cloud RPC-style signature
pub struct AliyunRpc<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub version: &'a str,
}

impl AliyunRpc<'_> {
    pub(crate) fn string_to_sign(method: &str, params: &BTreeMap<String, String>) -> String {
        format!("{}&{}&{}", method, percent_encode("/"), percent_encode(&canonical_query(params)))
    }

    /// Full query string for the action, common parameters and signature included
    pub fn query(
        &self,
        action: &str,
        params: &BTreeMap<String, String>,
        now: DateTime<Utc>,
        nonce: &str,
    ) -> Result<String> {
        let mut all = params.clone();
        all.insert("Action".into(), action.into());
        all.insert("Format".into(), "JSON".into());
        all.insert("Version".into(), self.version.into());
        all.insert("AccessKeyId".into(), self.access_key.into());
        all.insert("SignatureMethod".into(), "HMAC-SHA1".into());
        all.insert("SignatureVersion".into(), "1.0".into());
        all.insert("SignatureNonce".into(), nonce.into());
        all.insert("Timestamp".into(), now.format("%Y-%m-%dT%H:%M:%SZ").to_string());

        let string_to_sign = Self::string_to_sign("GET", &all);
        let signature = STANDARD.encode(hmac_sha1(
            format!("{}&", self.secret_key).as_bytes(),
            string_to_sign.as_bytes(),
        )?);
        all.insert("Signature".into(), signature);
        Ok(canonical_query(&all))
    }
}

/// Alibaba Cloud ROA-style signature, used for body-less requests
pub struct AliyunRoa<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub version: &'a str,
    pub region: &'a str,
}

impl AliyunRoa<'_> {
    pub(crate) fn string_to_sign(
        method: &str,
        headers: &BTreeMap<String, String>,
        path: &str,
        query: &BTreeMap<String, String>,
    ) -> String {
        let header = |name: &str| headers.get(name).map(String::as_str).unwrap_or_default();
        let acs: String = headers
            .iter()
            .filter(|(k, _)| k.starts_with("x-acs-"))
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();
        let mut resource = path.to_string();
        if !query.is_empty() {
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            resource.push('?');
            resource.push_str(&pairs.join("&"));
        }
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}{}",
            method,
            header("accept"),
            header("content-md5"),
            header("content-type"),
            header("date"),
            acs,
            resource
        )
    }

    /// Headers to send, `authorization` included
    pub fn headers(
        &self,
        method: &str,
        path: &str,
        query: &BTreeMap<String, String>,
        now: DateTime<Utc>,
        nonce: &str,
    ) -> Result<BTreeMap<String, String>> {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        headers.insert("date".to_string(), now.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        headers.insert("x-acs-region-id".to_string(), self.region.to_string());
        headers.insert("x-acs-signature-method".to_string(), "HMAC-SHA1".to_string());
        headers.insert("x-acs-signature-nonce".to_string(), nonce.to_string());
        headers.insert("x-acs-signature-version".to_string(), "1.0".to_string());
        headers.insert("x-acs-version".to_string(), self.version.to_string());

        let string_to_sign = Self::string_to_sign(method, &headers, path, query);
        let signature = STANDARD.encode(hmac_sha1(self.secret_key.as_bytes(), string_to_sign.as_bytes())?);
        headers.insert(
            "authorization".to_string(),
            format!("acs {}:{}", self.access_key, signature),
        );
        Ok(headers)
    }
}

/// Tencent Cloud API 3.0 signature
pub struct Tc3<'a> {
    pub secret_id: &'a str,
    pub secret_key: &'a str,
    pub service: &'a str,
}

pub const TC3_CONTENT_TYPE: &str = "application/json; charset=utf-8";

impl Tc3<'_> {
    pub(crate) fn canonical_request(host: &str, payload: &[u8]) -> String {
        format!(
            "POST\n/\n\ncontent-type:{}\nhost:{}\n\ncontent-type;host\n{}",
            TC3_CONTENT_TYPE,
            host,
            sha256_hex(payload)
        )
    }

    /// `Authorization` header for a JSON POST to `host`
    pub fn authorization(&self, host: &str, payload: &[u8], now: DateTime<Utc>) -> Result<String> {
        let date = now.format("%Y-%m-%d").to_string();
        let scope = format!("{}/{}/tc3_request", date, self.service);
        let string_to_sign = format!(
            "TC3-HMAC-SHA256\n{}\n{}\n{}",
            now.timestamp(),
            scope,
            sha256_hex(Self::canonical_request(host, payload).as_bytes())
        );
        let secret_date = hmac_sha256(format!("TC3{}", self.secret_key).as_bytes(), date.as_bytes())?;
        let secret_service = hmac_sha256(&secret_date, self.service.as_bytes())?;
        let secret_signing = hmac_sha256(&secret_service, b"tc3_request")?;
        let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);
        Ok(format!(
            "TC3-HMAC-SHA256 Credential={}/{}, SignedHeaders=content-type;host, Signature={}",
            self.secret_id, scope, signature
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_hmac_vectors() {
        // RFC 4231 test case 2 and RFC 2202 test case 2
        assert_eq!(
            hex::encode(hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert_eq!(
            hex::encode(hmac_sha1(b"Jefe", b"what do ya want for nothing?").unwrap()),
            "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("a b*c~d"), "a%20b%2Ac~d");
        assert_eq!(percent_encode("2016-02-23T12:46:24Z"), "2016-02-23T12%3A46%3A24Z");
    }

    #[test]
    fn test_aliyun_rpc_string_to_sign() {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), "ListInstance".to_string());
        params.insert("Timestamp".to_string(), "2016-02-23T12:46:24Z".to_string());
        assert_eq!(
            AliyunRpc::string_to_sign("GET", &params),
            "GET&%2F&Action%3DListInstance%26Timestamp%3D2016-02-23T12%253A46%253A24Z"
        );

        let signer = AliyunRpc {
            access_key: "ak",
            secret_key: "sk",
            version: "2018-12-01",
        };
        let query = signer.query("GetInstance", &BTreeMap::new(), at("2024-01-01T00:00:00Z"), "n").unwrap();
        assert!(query.contains("Action=GetInstance"));
        assert!(query.contains("Signature="));
        assert!(query.contains("Timestamp=2024-01-01T00%3A00%3A00Z"));
    }

    #[test]
    fn test_aliyun_roa_string_to_sign() {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        headers.insert("date".to_string(), "Mon, 01 Jan 2024 00:00:00 GMT".to_string());
        headers.insert("x-acs-version".to_string(), "2016-06-07".to_string());
        let mut query = BTreeMap::new();
        query.insert("PageSize".to_string(), "100".to_string());
        query.insert("Page".to_string(), "1".to_string());
        assert_eq!(
            AliyunRoa::string_to_sign("GET", &headers, "/repos", &query),
            "GET\napplication/json\n\n\nMon, 01 Jan 2024 00:00:00 GMT\nx-acs-version:2016-06-07\n/repos?Page=1&PageSize=100"
        );
        let signer = AliyunRoa {
            access_key: "ak",
            secret_key: "sk",
            version: "2016-06-07",
            region: "cn-hangzhou",
        };
        let signed = signer.headers("GET", "/tokens", &BTreeMap::new(), at("2024-01-01T00:00:00Z"), "n").unwrap();
        assert_eq!(signed["date"], "Mon, 01 Jan 2024 00:00:00 GMT");
        assert!(signed["authorization"].starts_with("acs ak:"));
    }

    #[test]
    fn test_tc3_authorization() {
        let signer = Tc3 {
            secret_id: "sid",
            secret_key: "skey",
            service: "tcr",
        };
        let auth = signer
            .authorization("tcr.tencentcloudapi.com", b"{}", at("2024-01-01T00:00:00Z"))
            .unwrap();
        assert!(auth.starts_with("TC3-HMAC-SHA256 Credential=sid/2024-01-01/tcr/tc3_request, SignedHeaders=content-type;host, Signature="));
        assert_eq!(auth.rsplit('=').next().unwrap().len(), 64);
    }
}
