//! Blob operations
//!
//! Uploads always use the three-step chunked protocol:
//! 1. `POST /v2/{name}/blobs/uploads/` opens a session (202 + `Location`)
//! 2. `PATCH {location}` streams the bytes with `Content-Range: 0-{size-1}`,
//!    or chunked when the size is unknown
//! 3. `PUT {location}?digest={digest}` with an empty body commits (201)
//!
//! Monolithic uploads are never issued; several registries reject them.

use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::http::resolve;
use crate::registry::Repository;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Method, Response};
use url::Url;

/// Blob content as an owned byte stream; the consumer takes ownership
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

pub const DOCKER_UPLOAD_UUID: &str = "Docker-Upload-UUID";

impl Repository {
    pub async fn blob_exist(&self, digest: &str) -> Result<bool> {
        let builder = self.http.request(Method::HEAD, &self.url(&format!("blobs/{}", digest)));
        let response = self.http.send(builder).await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(HttpErrorHandler::from_response(response).await),
        }
    }

    /// Opens the blob for reading. The size is 0 when the registry omits it.
    pub async fn pull_blob(&self, digest: &str) -> Result<(u64, BlobStream)> {
        let response = self
            .http
            .execute(self.http.get(&self.url(&format!("blobs/{}", digest))))
            .await?;
        let size = response.content_length().unwrap_or_default();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ReplicationError::from))
            .boxed();
        Ok((size, stream))
    }

    /// Uploads the blob with the chunked protocol
    pub async fn push_blob(&self, digest: &str, size: u64, blob: BlobStream) -> Result<()> {
        let location = self.initiate_upload().await?;
        tracing::debug!(repository = %self.name, digest, size, "upload session opened");

        let mut builder = self
            .http
            .request(Method::PATCH, location.as_str())
            .header(CONTENT_TYPE, "application/octet-stream");
        // unknown size goes out chunked
        if size > 0 {
            builder = builder
                .header(CONTENT_LENGTH, size.to_string())
                .header(CONTENT_RANGE, format!("0-{}", size - 1));
        }
        let response = self.http.execute(builder.body(Body::wrap_stream(blob))).await?;
        let location = match self.location(&response)? {
            Some(next) => next,
            None => location,
        };

        let mut commit = location;
        commit.query_pairs_mut().append_pair("digest", digest);
        let builder = self
            .http
            .request(Method::PUT, commit.as_str())
            .header(CONTENT_LENGTH, "0");
        self.http.execute(builder).await?;
        Ok(())
    }

    /// Cross-repository mount. `true` when mounted (201), `false` when the
    /// registry opened a regular upload instead (202).
    pub async fn mount_blob(&self, digest: &str, from: &str) -> Result<bool> {
        let mut url = Url::parse(&self.url("blobs/uploads/"))?;
        url.query_pairs_mut().append_pair("mount", digest).append_pair("from", from);
        let builder = self
            .http
            .request(Method::POST, url.as_str())
            .header(CONTENT_LENGTH, "0");
        let response = self.http.execute(builder).await?;
        match response.status().as_u16() {
            201 => Ok(true),
            _ => Ok(false),
        }
    }

    async fn initiate_upload(&self) -> Result<Url> {
        let builder = self
            .http
            .request(Method::POST, &self.url("blobs/uploads/"))
            .header(CONTENT_LENGTH, "0");
        let response = self.http.execute(builder).await?;
        self.location(&response)?.ok_or_else(|| {
            ReplicationError::protocol(format!("no Location returned when opening an upload to {}", self.name))
        })
    }

    /// The `Location` header, resolved against the registry base
    fn location(&self, response: &Response) -> Result<Option<Url>> {
        match response.headers().get(LOCATION) {
            Some(value) => Ok(Some(resolve(&self.base_url, value.to_str()?)?)),
            None => Ok(None),
        }
    }
}
