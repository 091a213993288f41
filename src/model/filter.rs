//! Policy filter records as stored by the platform

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Name,
    Tag,
    Label,
    Resource,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterType::Name => "name",
            FilterType::Tag => "tag",
            FilterType::Label => "label",
            FilterType::Resource => "resource",
        };
        f.write_str(s)
    }
}

/// Whether a predicate keeps or drops the items it matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decoration {
    #[default]
    Matches,
    Excludes,
}

impl Decoration {
    /// Applies the decoration to a raw predicate result
    pub fn keep(self, matched: bool) -> bool {
        match self {
            Decoration::Matches => matched,
            Decoration::Excludes => !matched,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    List(Vec<String>),
}

/// How an adapter can apply a filter: on its own listing API or after the fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStyle {
    Text,
    List,
    Radio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub value: FilterValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoration: Option<Decoration>,
}

impl Filter {
    pub fn name(pattern: impl Into<String>) -> Self {
        Self::text(FilterType::Name, pattern)
    }

    pub fn tag(pattern: impl Into<String>) -> Self {
        Self::text(FilterType::Tag, pattern)
    }

    pub fn resource(resource_type: impl Into<String>) -> Self {
        Self::text(FilterType::Resource, resource_type)
    }

    pub fn label(labels: Vec<String>) -> Self {
        Self {
            filter_type: FilterType::Label,
            value: FilterValue::List(labels),
            decoration: None,
        }
    }

    fn text(filter_type: FilterType, value: impl Into<String>) -> Self {
        Self {
            filter_type,
            value: FilterValue::Text(value.into()),
            decoration: None,
        }
    }

    pub fn excluding(mut self) -> Self {
        self.decoration = Some(Decoration::Excludes);
        self
    }

    pub fn decoration(&self) -> Decoration {
        self.decoration.unwrap_or_default()
    }

    /// The string value of a name, tag or resource filter
    pub fn text_value(&self) -> Result<&str> {
        match &self.value {
            FilterValue::Text(s) => Ok(s),
            FilterValue::List(_) => Err(ReplicationError::invalid(format!(
                "{} filter needs a string value",
                self.filter_type
            ))),
        }
    }

    /// The label list of a label filter
    pub fn list_value(&self) -> Result<&[String]> {
        match &self.value {
            FilterValue::List(labels) => Ok(labels),
            FilterValue::Text(_) => Err(ReplicationError::invalid(format!(
                "{} filter needs a list value",
                self.filter_type
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.filter_type {
            FilterType::Name | FilterType::Tag => {
                let pattern = self.text_value()?;
                crate::util::glob::validate(pattern)
            }
            FilterType::Resource => {
                let value = self.text_value()?;
                value.parse::<crate::model::ResourceType>().map(|_| ())
            }
            FilterType::Label => self.list_value().map(|_| ()),
        }
    }
}

/// First name filter pattern in the list, if any
pub fn name_pattern(filters: &[Filter]) -> Option<&str> {
    filters
        .iter()
        .find(|f| f.filter_type == FilterType::Name)
        .and_then(|f| f.text_value().ok())
}
