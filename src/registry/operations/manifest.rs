//! Manifest operations
//!
//! - existence check (HEAD /v2/{name}/manifests/{reference})
//! - download with the accepted media types (GET)
//! - upload with an explicit Content-Type (PUT)
//! - deletion by digest, resolving tags first (DELETE)

use crate::digest::DigestUtils;
use crate::error::{ReplicationError, Result};
use crate::registry::Repository;
use crate::registry::manifest::{
    ACCEPTED_MEDIA_TYPES, Descriptor, MEDIA_TYPE_SCHEMA1, MEDIA_TYPE_SCHEMA1_SIGNED, Manifest,
};
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};

pub const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

fn accept_header(accepted: &[&str]) -> String {
    if accepted.is_empty() {
        ACCEPTED_MEDIA_TYPES.join(", ")
    } else {
        accepted.join(", ")
    }
}

impl Repository {
    /// Descriptor of the manifest, or `None` when the registry answers 404
    pub async fn manifest_exist(&self, reference: &str) -> Result<Option<Descriptor>> {
        let builder = self
            .http
            .request(Method::HEAD, &self.url(&format!("manifests/{}", reference)))
            .header(ACCEPT, accept_header(&[]));
        let response = self.http.send(builder).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = crate::error::handlers::HttpErrorHandler::check(response).await?;
        let headers = response.headers();
        let media_type = header_str(headers, CONTENT_TYPE.as_str()).unwrap_or_default().to_string();
        let size = header_str(headers, CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        let digest = header_str(headers, DOCKER_CONTENT_DIGEST).unwrap_or_default().to_string();
        Ok(Some(Descriptor::new(media_type, digest, size)))
    }

    /// Downloads and parses the manifest, returning it with its digest
    pub async fn pull_manifest(&self, reference: &str, accepted: &[&str]) -> Result<(Manifest, String)> {
        let builder = self
            .http
            .get(&self.url(&format!("manifests/{}", reference)))
            .header(ACCEPT, accept_header(accepted));
        let response = self.http.execute(builder).await?;
        let content_type = header_str(response.headers(), CONTENT_TYPE.as_str()).map(str::to_string);
        let header_digest = header_str(response.headers(), DOCKER_CONTENT_DIGEST).map(str::to_string);
        let payload = response.bytes().await?;
        let manifest = Manifest::parse(content_type.as_deref(), payload)?;

        // schema 1 digests cover the payload without its signatures
        let signed = manifest.media_type == MEDIA_TYPE_SCHEMA1_SIGNED || manifest.media_type == MEDIA_TYPE_SCHEMA1;
        if DigestUtils::is_digest(reference) && !signed {
            DigestUtils::verify(&manifest.payload, reference)
                .map_err(|e| e.context(format!("{}@{}", self.name, reference)))?;
        }
        let digest = header_digest.unwrap_or_else(|| DigestUtils::compute_digest(&manifest.payload));
        Ok((manifest, digest))
    }

    /// Uploads the payload and returns the digest the registry assigned
    pub async fn push_manifest(&self, reference: &str, media_type: &str, payload: bytes::Bytes) -> Result<String> {
        let computed = DigestUtils::compute_digest(&payload);
        let builder = self
            .http
            .request(Method::PUT, &self.url(&format!("manifests/{}", reference)))
            .header(CONTENT_TYPE, media_type)
            .body(payload);
        let response = self.http.execute(builder).await?;
        Ok(header_str(response.headers(), DOCKER_CONTENT_DIGEST)
            .map(str::to_string)
            .unwrap_or(computed))
    }

    /// Deletes by digest; a tag is resolved to its digest first
    pub async fn delete_manifest(&self, reference: &str) -> Result<()> {
        let digest = if DigestUtils::is_digest(reference) {
            reference.to_string()
        } else {
            let descriptor = self.manifest_exist(reference).await?.ok_or_else(|| {
                ReplicationError::NotFound(format!("{}:{} not found", self.name, reference))
            })?;
            if descriptor.digest.is_empty() {
                return Err(ReplicationError::protocol(format!(
                    "no digest returned for {}:{}",
                    self.name, reference
                )));
            }
            descriptor.digest
        };
        let builder = self
            .http
            .request(Method::DELETE, &self.url(&format!("manifests/{}", digest)));
        self.http.execute(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::http::HttpClient;
    use crate::registry::Client;
    use crate::registry::manifest::MEDIA_TYPE_DOCKER_MANIFEST;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAYLOAD: &str = r#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","config":{"mediaType":"application/vnd.docker.container.image.v1+json","digest":"sha256:c","size":1},"layers":[]}"#;

    fn client(server: &MockServer) -> Client {
        Client::new(&server.uri(), HttpClient::new(reqwest::Client::new())).unwrap()
    }

    #[tokio::test]
    async fn test_manifest_exist() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/library/busybox/manifests/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Docker-Content-Digest", "sha256:abc")
                    .insert_header("Content-Type", MEDIA_TYPE_DOCKER_MANIFEST),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/v2/library/busybox/manifests/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/v2/library/busybox/manifests/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let repo = client(&server).repository("library/busybox");
        let descriptor = repo.manifest_exist("latest").await.unwrap().unwrap();
        assert_eq!(descriptor.digest, "sha256:abc");
        assert_eq!(descriptor.media_type, MEDIA_TYPE_DOCKER_MANIFEST);
        assert!(repo.manifest_exist("missing").await.unwrap().is_none());
        assert!(repo.manifest_exist("broken").await.is_err());
    }

    #[tokio::test]
    async fn test_pull_manifest_digest_fallback_and_verification() {
        let server = MockServer::start().await;
        let digest = crate::digest::DigestUtils::compute_digest(PAYLOAD.as_bytes());
        Mock::given(method("GET"))
            .and(path("/v2/a/manifests/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", MEDIA_TYPE_DOCKER_MANIFEST)
                    .set_body_string(PAYLOAD),
            )
            .mount(&server)
            .await;
        let bogus = format!("sha256:{}", "0".repeat(64));
        Mock::given(method("GET"))
            .and(path(format!("/v2/a/manifests/{}", bogus)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", MEDIA_TYPE_DOCKER_MANIFEST)
                    .set_body_string(PAYLOAD),
            )
            .mount(&server)
            .await;

        let repo = client(&server).repository("a");
        let (manifest, pulled) = repo.pull_manifest("latest", &[]).await.unwrap();
        assert_eq!(pulled, digest);
        assert_eq!(manifest.media_type, MEDIA_TYPE_DOCKER_MANIFEST);
        assert!(repo.pull_manifest(&bogus, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_push_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v2/a/manifests/v1"))
            .and(header("content-type", MEDIA_TYPE_DOCKER_MANIFEST))
            .respond_with(ResponseTemplate::new(201).insert_header("Docker-Content-Digest", "sha256:pushed"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/v2/a/manifests/v1"))
            .respond_with(ResponseTemplate::new(200).insert_header("Docker-Content-Digest", "sha256:pushed"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v2/a/manifests/sha256:pushed"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let repo = client(&server).repository("a");
        let digest = repo
            .push_manifest("v1", MEDIA_TYPE_DOCKER_MANIFEST, bytes::Bytes::from_static(PAYLOAD.as_bytes()))
            .await
            .unwrap();
        assert_eq!(digest, "sha256:pushed");
        repo.delete_manifest("v1").await.unwrap();
    }
}
