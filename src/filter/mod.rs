//! Filter engine
//!
//! Policy [`Filter`] records are compiled into predicates over two kinds of
//! items: repositories and vtags (tag-level items with labels). A compiled
//! filter only looks at the items it applies to and passes the others
//! through, so a single ordered list can be run over mixed inputs.
//! Artifact-level filtering lives in [`artifact`].

pub mod artifact;

pub use artifact::{ArtifactFilter, build_artifact_filters, filter_artifacts};

use crate::error::Result;
use crate::model::{Decoration, Filter, FilterType, ResourceType};
use crate::util::glob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterableType {
    Repository,
    VTag,
}

/// An item the engine can filter
pub trait Filterable {
    fn filterable_type(&self) -> FilterableType;
    fn resource_type(&self) -> ResourceType;
    fn name(&self) -> &str;
    fn labels(&self) -> &[String];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryItem {
    pub name: String,
    pub resource_type: ResourceType,
}

impl RepositoryItem {
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource_type,
        }
    }
}

impl Filterable for RepositoryItem {
    fn filterable_type(&self) -> FilterableType {
        FilterableType::Repository
    }
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn labels(&self) -> &[String] {
        &[]
    }
}

/// A tag (or chart version) with its labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTag {
    pub name: String,
    pub resource_type: ResourceType,
    pub labels: Vec<String>,
}

impl VTag {
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource_type,
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }
}

impl Filterable for VTag {
    fn filterable_type(&self) -> FilterableType {
        FilterableType::VTag
    }
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// A compiled item filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFilter {
    /// Keeps items of the resource type; applies to repositories and vtags
    ResourceType(ResourceType),
    /// Glob over the name of items of the target type
    Name {
        pattern: String,
        target: FilterableType,
        decoration: Decoration,
    },
    /// Keeps vtags carrying every listed label; an empty list keeps everything
    Label { labels: Vec<String>, decoration: Decoration },
}

impl ItemFilter {
    pub fn applies_to(&self, filterable_type: FilterableType) -> bool {
        match self {
            ItemFilter::ResourceType(_) => true,
            ItemFilter::Name { target, .. } => *target == filterable_type,
            ItemFilter::Label { .. } => filterable_type == FilterableType::VTag,
        }
    }

    /// Whether the item survives the filter
    pub fn keep<T: Filterable>(&self, item: &T) -> Result<bool> {
        match self {
            ItemFilter::ResourceType(resource_type) => Ok(item.resource_type() == *resource_type),
            ItemFilter::Name {
                pattern, decoration, ..
            } => Ok(decoration.keep(glob::matches(pattern, item.name())?)),
            ItemFilter::Label { labels, decoration } => {
                if labels.is_empty() {
                    return Ok(true);
                }
                let matched = labels.iter().all(|l| item.labels().contains(l));
                Ok(decoration.keep(matched))
            }
        }
    }
}

/// Compiles policy filters: `name` targets repositories, `tag` targets vtags
pub fn build_filters(filters: &[Filter]) -> Result<Vec<ItemFilter>> {
    filters
        .iter()
        .map(|filter| {
            Ok(match filter.filter_type {
                FilterType::Name => ItemFilter::Name {
                    pattern: filter.text_value()?.to_string(),
                    target: FilterableType::Repository,
                    decoration: filter.decoration(),
                },
                FilterType::Tag => ItemFilter::Name {
                    pattern: filter.text_value()?.to_string(),
                    target: FilterableType::VTag,
                    decoration: filter.decoration(),
                },
                FilterType::Label => ItemFilter::Label {
                    labels: filter.list_value()?.to_vec(),
                    decoration: filter.decoration(),
                },
                FilterType::Resource => ItemFilter::ResourceType(filter.text_value()?.parse()?),
            })
        })
        .collect()
}

/// Runs the filters in order; each only judges the items it applies to
pub fn apply<T: Filterable>(filters: &[ItemFilter], items: Vec<T>) -> Result<Vec<T>> {
    let mut items = items;
    for filter in filters {
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if !filter.applies_to(item.filterable_type()) || filter.keep(&item)? {
                kept.push(item);
            }
        }
        items = kept;
    }
    Ok(items)
}

/// Repository names surviving the policy filters
pub fn filter_repositories(
    filters: &[Filter],
    repositories: Vec<String>,
    resource_type: ResourceType,
) -> Result<Vec<String>> {
    let compiled = build_filters(filters)?;
    let items = repositories
        .into_iter()
        .map(|name| RepositoryItem::new(name, resource_type))
        .collect();
    Ok(apply(&compiled, items)?.into_iter().map(|item| item.name).collect())
}

/// Vtags surviving the policy filters
pub fn filter_vtags(filters: &[Filter], vtags: Vec<VTag>) -> Result<Vec<VTag>> {
    let compiled = build_filters(filters)?;
    apply(&compiled, vtags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_filter_only_targets_its_type() {
        let filters = build_filters(&[Filter::name("library/*"), Filter::tag("1.*")]).unwrap();
        let repos = apply(
            &filters,
            vec![
                RepositoryItem::new("library/hello-world", ResourceType::Artifact),
                RepositoryItem::new("other/x", ResourceType::Artifact),
            ],
        )
        .unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "library/hello-world");

        let tags = apply(
            &filters,
            vec![VTag::new("1.0", ResourceType::Artifact), VTag::new("2.0", ResourceType::Artifact)],
        )
        .unwrap();
        assert_eq!(tags, vec![VTag::new("1.0", ResourceType::Artifact)]);
    }

    #[test]
    fn test_label_filter() {
        let tags = vec![
            VTag::new("a", ResourceType::Artifact).with_labels(vec!["prod".into(), "signed".into()]),
            VTag::new("b", ResourceType::Artifact).with_labels(vec!["prod".into()]),
        ];
        let kept = filter_vtags(&[Filter::label(vec!["prod".into(), "signed".into()])], tags.clone()).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "a");

        let excluded = filter_vtags(&[Filter::label(vec!["signed".into()]).excluding()], tags.clone()).unwrap();
        assert_eq!(excluded[0].name, "b");

        assert_eq!(filter_vtags(&[Filter::label(vec![])], tags.clone()).unwrap(), tags);
    }

    #[test]
    fn test_resource_type_filter() {
        let kept = filter_repositories(
            &[Filter::resource("chart")],
            vec!["a".into(), "b".into()],
            ResourceType::Artifact,
        )
        .unwrap();
        assert!(kept.is_empty());
        let kept = filter_repositories(&[Filter::resource("image")], vec!["a".into()], ResourceType::Artifact).unwrap();
        assert_eq!(kept, vec!["a"]);
    }

    #[test]
    fn test_exclude_names() {
        let kept = filter_repositories(
            &[Filter::name("library/**").excluding()],
            vec!["library/a".into(), "team/b".into()],
            ResourceType::Artifact,
        )
        .unwrap();
        assert_eq!(kept, vec!["team/b"]);
    }

    #[test]
    fn test_invalid_filter_value() {
        let bad = Filter {
            filter_type: FilterType::Name,
            value: crate::model::FilterValue::List(vec![]),
            decoration: None,
        };
        assert!(build_filters(&[bad]).is_err());
        assert!(filter_repositories(&[Filter::name("[oops")], vec!["a".into()], ResourceType::Artifact).is_err());
    }
}
