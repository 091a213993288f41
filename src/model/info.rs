//! Adapter capability descriptors and UI hints

use crate::model::filter::{FilterStyle, FilterType};
use crate::model::registry::RegistryType;
use crate::model::resource::ResourceType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    EventBased,
}

/// A filter an adapter supports, with how the UI should render its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedFilter {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub style: FilterStyle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// What an adapter advertises through `info()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    pub description: String,
    pub supported_resource_types: Vec<ResourceType>,
    pub supported_resource_filters: Vec<SupportedFilter>,
    pub supported_triggers: Vec<TriggerType>,
    #[serde(default)]
    pub supported_repository_path_components: String,
}

impl RegistryInfo {
    /// Artifact registry with name and tag text filters and manual/scheduled triggers
    pub fn artifact(registry_type: RegistryType, description: impl Into<String>) -> Self {
        Self {
            registry_type,
            description: description.into(),
            supported_resource_types: vec![ResourceType::Artifact],
            supported_resource_filters: vec![
                SupportedFilter {
                    filter_type: FilterType::Name,
                    style: FilterStyle::Text,
                    values: Vec::new(),
                },
                SupportedFilter {
                    filter_type: FilterType::Tag,
                    style: FilterStyle::Text,
                    values: Vec::new(),
                },
            ],
            supported_triggers: vec![TriggerType::Manual, TriggerType::Scheduled],
            supported_repository_path_components: "unlimited".to_string(),
        }
    }

    pub fn with_resource_types(mut self, types: Vec<ResourceType>) -> Self {
        self.supported_resource_types = types;
        self
    }

    pub fn with_filter(mut self, filter: SupportedFilter) -> Self {
        self.supported_resource_filters.push(filter);
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<TriggerType>) -> Self {
        self.supported_triggers = triggers;
        self
    }

    /// Repository path depth the destination accepts, e.g. `2` for `namespace/name`
    pub fn with_path_components(mut self, components: impl Into<String>) -> Self {
        self.supported_repository_path_components = components.into();
        self
    }

    pub fn supports(&self, resource_type: ResourceType) -> bool {
        self.supported_resource_types.contains(&resource_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    /// Free-form URL input
    Input,
    /// Pick one of the listed endpoints
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub key: String,
    pub value: String,
}

impl Endpoint {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPattern {
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialFieldType {
    Free,
    Fix,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPattern {
    pub access_key_type: CredentialFieldType,
    #[serde(default)]
    pub access_key_data: String,
    pub access_secret_type: CredentialFieldType,
    #[serde(default)]
    pub access_secret_data: String,
}

/// UI hints published by a factory
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdapterPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_pattern: Option<EndpointPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_pattern: Option<CredentialPattern>,
}

impl AdapterPattern {
    /// Pattern offering a fixed list of endpoints
    pub fn endpoints(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoint_pattern: Some(EndpointPattern {
                endpoint_type: EndpointType::List,
                endpoints,
            }),
            credential_pattern: None,
        }
    }

    pub fn with_credential(mut self, pattern: CredentialPattern) -> Self {
        self.credential_pattern = Some(pattern);
        self
    }
}
