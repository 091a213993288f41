//! Manifest media types and reference extraction
//!
//! Supports schema 1 (signed and unsigned), Docker schema 2, Docker manifest
//! lists, OCI image manifests and OCI image indexes. References are exposed in
//! the order the payload declares them: config first, then layers, or the
//! child manifests of a list/index.

use crate::error::{ReplicationError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const MEDIA_TYPE_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const MEDIA_TYPE_SCHEMA1_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Layers served from outside the registry; never copied
pub const MEDIA_TYPE_FOREIGN_LAYER: &str = "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

/// Media type reported for schema 1 layer references
pub const MEDIA_TYPE_SCHEMA1_LAYER: &str = "application/vnd.docker.container.image.rootfs.diff+x-gtar";

/// Everything the client accepts when pulling manifests
pub const ACCEPTED_MEDIA_TYPES: [&str; 6] = [
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_SCHEMA1_SIGNED,
    MEDIA_TYPE_SCHEMA1,
];

/// Whether the media type names a manifest (as opposed to a blob)
pub fn is_manifest_media_type(media_type: &str) -> bool {
    ACCEPTED_MEDIA_TYPES.contains(&media_type)
}

pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_OCI_INDEX || media_type == MEDIA_TYPE_DOCKER_MANIFEST_LIST
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
    #[serde(default)]
    fs_layers: Vec<FsLayer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FsLayer {
    blob_sum: String,
}

/// A parsed manifest together with its exact payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub media_type: String,
    pub payload: Bytes,
    references: Vec<Descriptor>,
}

impl Manifest {
    /// Parses the payload. `content_type` is the response header when there was one.
    pub fn parse(content_type: Option<&str>, payload: Bytes) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(&payload)?;
        let media_type = match content_type.map(normalize_content_type) {
            // registries serving schema 1 often answer with plain JSON
            Some("application/json") => MEDIA_TYPE_SCHEMA1_SIGNED.to_string(),
            Some(mt) if !mt.is_empty() && mt != "application/octet-stream" && mt != "text/plain" => mt.to_string(),
            _ => sniff_media_type(&envelope)?,
        };

        let references = match media_type.as_str() {
            MEDIA_TYPE_SCHEMA1 | MEDIA_TYPE_SCHEMA1_SIGNED => envelope
                .fs_layers
                .into_iter()
                .map(|l| Descriptor::new(MEDIA_TYPE_SCHEMA1_LAYER, l.blob_sum, 0))
                .collect(),
            MEDIA_TYPE_DOCKER_MANIFEST | MEDIA_TYPE_OCI_MANIFEST => {
                let config = envelope
                    .config
                    .ok_or_else(|| ReplicationError::protocol("manifest without config descriptor"))?;
                std::iter::once(config).chain(envelope.layers).collect()
            }
            MEDIA_TYPE_DOCKER_MANIFEST_LIST | MEDIA_TYPE_OCI_INDEX => envelope.manifests,
            other => {
                return Err(ReplicationError::protocol(format!("unsupported manifest media type: {}", other)));
            }
        };

        Ok(Self {
            media_type,
            payload,
            references,
        })
    }

    /// Referenced descriptors in declaration order
    pub fn references(&self) -> &[Descriptor] {
        &self.references
    }

    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.media_type)
    }
}

/// Strips parameters such as `; charset=utf-8`
fn normalize_content_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

fn sniff_media_type(envelope: &Envelope) -> Result<String> {
    if let Some(media_type) = envelope.media_type.as_ref().filter(|m| !m.is_empty()) {
        return Ok(media_type.clone());
    }
    match envelope.schema_version {
        Some(1) => Ok(MEDIA_TYPE_SCHEMA1_SIGNED.to_string()),
        // OCI payloads may omit mediaType; an index has manifests, an image has a config
        Some(2) if !envelope.manifests.is_empty() => Ok(MEDIA_TYPE_OCI_INDEX.to_string()),
        Some(2) if envelope.config.is_some() => Ok(MEDIA_TYPE_OCI_MANIFEST.to_string()),
        _ => Err(ReplicationError::protocol("cannot determine manifest media type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "digest": "sha256:c", "size": 10},
        "layers": [
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": "sha256:l1", "size": 20},
            {"mediaType": "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip", "digest": "sha256:l2", "size": 30}
        ]
    }"#;

    #[test]
    fn test_schema2_references_in_order() {
        let manifest = Manifest::parse(Some(MEDIA_TYPE_DOCKER_MANIFEST), Bytes::from_static(IMAGE.as_bytes())).unwrap();
        let digests: Vec<&str> = manifest.references().iter().map(|d| d.digest.as_str()).collect();
        assert_eq!(digests, ["sha256:c", "sha256:l1", "sha256:l2"]);
        assert_eq!(manifest.references()[2].media_type, MEDIA_TYPE_FOREIGN_LAYER);
        assert!(!manifest.is_index());
    }

    #[test]
    fn test_index() {
        let payload = r#"{
            "schemaVersion": 2,
            "manifests": [{"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:m", "size": 5}]
        }"#;
        let manifest = Manifest::parse(None, Bytes::from_static(payload.as_bytes())).unwrap();
        assert_eq!(manifest.media_type, MEDIA_TYPE_OCI_INDEX);
        assert!(manifest.is_index());
        assert_eq!(manifest.references().len(), 1);
    }

    #[test]
    fn test_plain_json_is_schema1_signed() {
        let payload = r#"{"schemaVersion": 1, "name": "a", "tag": "b", "fsLayers": [{"blobSum": "sha256:x"}]}"#;
        let manifest = Manifest::parse(Some("application/json; charset=utf-8"), Bytes::from_static(payload.as_bytes())).unwrap();
        assert_eq!(manifest.media_type, MEDIA_TYPE_SCHEMA1_SIGNED);
        assert_eq!(manifest.references()[0].digest, "sha256:x");
    }

    #[test]
    fn test_unknown_media_type() {
        let err = Manifest::parse(Some("application/vnd.example+json"), Bytes::from_static(b"{}")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
        assert!(Manifest::parse(None, Bytes::from_static(b"not json")).is_err());
    }
}
