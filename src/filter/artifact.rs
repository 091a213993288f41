//! Artifact-level filters
//!
//! Unlike item filters these may rewrite what they keep: the tag filter
//! returns a copy of each artifact holding only the tags that survived.
//! Inputs are never mutated.

use crate::error::Result;
use crate::model::{Artifact, Decoration, Filter, FilterType, ResourceType};
use crate::util::glob;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactFilter {
    /// Keeps artifacts whose type belongs to the resource type
    Type(ResourceType),
    /// Keeps artifacts carrying every listed label
    Label { labels: Vec<String>, decoration: Decoration },
    /// Keeps tagged (`true`) or untagged (`false`) artifacts
    Tagged(bool),
    /// Keeps the tags matching the pattern
    Tag { pattern: String, decoration: Decoration },
}

/// Resource type an artifact type string belongs to
fn resource_type_of(artifact: &Artifact) -> ResourceType {
    if artifact.artifact_type.eq_ignore_ascii_case("chart") {
        ResourceType::Chart
    } else {
        ResourceType::Artifact
    }
}

impl ArtifactFilter {
    pub fn filter(&self, artifacts: &[Artifact]) -> Result<Vec<Artifact>> {
        match self {
            ArtifactFilter::Type(resource_type) => Ok(artifacts
                .iter()
                .filter(|a| resource_type_of(a) == *resource_type)
                .cloned()
                .collect()),
            ArtifactFilter::Label { labels, decoration } => {
                if labels.is_empty() {
                    return Ok(artifacts.to_vec());
                }
                Ok(artifacts
                    .iter()
                    .filter(|a| decoration.keep(labels.iter().all(|l| a.labels.contains(l))))
                    .cloned()
                    .collect())
            }
            ArtifactFilter::Tagged(tagged) => Ok(artifacts
                .iter()
                .filter(|a| a.tags.is_empty() != *tagged)
                .cloned()
                .collect()),
            ArtifactFilter::Tag { pattern, decoration } => {
                if pattern.is_empty() {
                    return Ok(artifacts.to_vec());
                }
                let mut result = Vec::new();
                for artifact in artifacts {
                    if artifact.tags.is_empty() {
                        if decoration.keep(glob::matches(pattern, "")?) {
                            result.push(artifact.clone());
                        }
                        continue;
                    }
                    let mut tags = Vec::new();
                    for tag in &artifact.tags {
                        if decoration.keep(glob::matches(pattern, tag)?) {
                            tags.push(tag.clone());
                        }
                    }
                    if tags.is_empty() {
                        continue;
                    }
                    result.push(Artifact {
                        artifact_type: artifact.artifact_type.clone(),
                        digest: artifact.digest.clone(),
                        tags,
                        labels: artifact.labels.clone(),
                    });
                }
                Ok(result)
            }
        }
    }
}

/// Compiles the tag, label and resource filters of a policy
pub fn build_artifact_filters(filters: &[Filter]) -> Result<Vec<ArtifactFilter>> {
    let mut compiled = Vec::new();
    for filter in filters {
        match filter.filter_type {
            FilterType::Tag => compiled.push(ArtifactFilter::Tag {
                pattern: filter.text_value()?.to_string(),
                decoration: filter.decoration(),
            }),
            FilterType::Label => compiled.push(ArtifactFilter::Label {
                labels: filter.list_value()?.to_vec(),
                decoration: filter.decoration(),
            }),
            FilterType::Resource => compiled.push(ArtifactFilter::Type(filter.text_value()?.parse()?)),
            FilterType::Name => {}
        }
    }
    Ok(compiled)
}

/// Runs the artifact filters of the policy in order
pub fn filter_artifacts(artifacts: &[Artifact], filters: &[Filter]) -> Result<Vec<Artifact>> {
    let mut current = artifacts.to_vec();
    for filter in build_artifact_filters(filters)? {
        current = filter.filter(&current)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(tags: &[&str]) -> Artifact {
        Artifact::tagged("image", tags.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_tag_filter_copies_surviving_tags() {
        let input = vec![artifact(&["1.0", "2.0", "1.1"]), artifact(&["3.0"])];
        let output = filter_artifacts(&input, &[Filter::tag("1.*")]).unwrap();
        assert_eq!(output, vec![artifact(&["1.0", "1.1"])]);
        // input untouched
        assert_eq!(input[0].tags, vec!["1.0", "2.0", "1.1"]);
    }

    #[test]
    fn test_untagged_artifacts() {
        let untagged = Artifact::default().with_digest("sha256:abc");
        let output = filter_artifacts(std::slice::from_ref(&untagged), &[Filter::tag("1.*")]).unwrap();
        assert!(output.is_empty());
        // `**` matches the empty tag
        let output = filter_artifacts(std::slice::from_ref(&untagged), &[Filter::tag("**")]).unwrap();
        assert_eq!(output, vec![untagged.clone()]);
        let output = filter_artifacts(std::slice::from_ref(&untagged), &[Filter::tag("{,latest}")]).unwrap();
        assert_eq!(output, vec![untagged.clone()]);
        let output = filter_artifacts(std::slice::from_ref(&untagged), &[Filter::tag("1.*").excluding()]).unwrap();
        assert_eq!(output, vec![untagged]);
    }

    #[test]
    fn test_exclude_tags() {
        let output = filter_artifacts(&[artifact(&["latest", "v1"])], &[Filter::tag("latest").excluding()]).unwrap();
        assert_eq!(output, vec![artifact(&["v1"])]);
    }

    #[test]
    fn test_label_and_tagged() {
        let labelled = artifact(&["a"]).with_labels(vec!["prod".into()]);
        let plain = artifact(&["b"]);
        let output = filter_artifacts(&[labelled.clone(), plain.clone()], &[Filter::label(vec!["prod".into()])]).unwrap();
        assert_eq!(output, vec![labelled.clone()]);

        let untagged = Artifact::default().with_digest("sha256:x");
        let tagged_only = ArtifactFilter::Tagged(true).filter(&[plain.clone(), untagged.clone()]).unwrap();
        assert_eq!(tagged_only, vec![plain]);
        let untagged_only = ArtifactFilter::Tagged(false).filter(&[labelled, untagged.clone()]).unwrap();
        assert_eq!(untagged_only, vec![untagged]);
    }

    #[test]
    fn test_type_filter() {
        let chart = Artifact::tagged("chart", vec!["0.1.0".into()]);
        let image = artifact(&["latest"]);
        let output = filter_artifacts(&[chart.clone(), image], &[Filter::resource("chart")]).unwrap();
        assert_eq!(output, vec![chart]);
    }
}
