//! What a replication job moves: a typed bundle of repository and references

use crate::error::{ReplicationError, Result};
use crate::model::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Resource type. Images and artifacts share one variant; `image` is accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    #[serde(alias = "image")]
    Artifact,
    Chart,
    Repository,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Artifact => "artifact",
            ResourceType::Chart => "chart",
            ResourceType::Repository => "repository",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" | "artifact" => Ok(ResourceType::Artifact),
            "chart" => Ok(ResourceType::Chart),
            "repository" => Ok(ResourceType::Repository),
            other => Err(ReplicationError::invalid(format!("unknown resource type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type", default)]
    pub artifact_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Artifact {
    pub fn tagged(artifact_type: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            digest: None,
            tags,
            labels: Vec::new(),
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// An artifact must be addressable by digest or by at least one tag
    pub fn validate(&self) -> Result<()> {
        if self.digest.as_deref().is_none_or(str::is_empty) && self.tags.is_empty() {
            return Err(ReplicationError::invalid("artifact needs a digest or at least one tag"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub repository: Repository,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Legacy reference list, consulted only when `artifacts` is empty
    #[serde(default)]
    pub vtags: Vec<String>,
}

impl ResourceMetadata {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: Repository::new(repository),
            artifacts: Vec::new(),
            vtags: Vec::new(),
        }
    }

    /// References to copy or delete: artifact tags, an untagged artifact's digest, else the vtags
    pub fn references(&self) -> Vec<String> {
        let mut references = Vec::new();
        for artifact in &self.artifacts {
            if artifact.tags.is_empty() {
                if let Some(digest) = artifact.digest.as_ref().filter(|d| !d.is_empty()) {
                    references.push(digest.clone());
                }
            } else {
                references.extend(artifact.tags.iter().cloned());
            }
        }
        if references.is_empty() {
            references.extend(self.vtags.iter().cloned());
        }
        references
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub metadata: ResourceMetadata,
    pub registry: Registry,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extended_info: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_delete_tag: bool,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

impl Resource {
    pub fn new(resource_type: ResourceType, metadata: ResourceMetadata, registry: Registry) -> Self {
        Self {
            resource_type,
            metadata,
            registry,
            extended_info: HashMap::new(),
            deleted: false,
            is_delete_tag: false,
            override_existing: false,
        }
    }

    pub fn repository(&self) -> &str {
        &self.metadata.repository.name
    }
}
