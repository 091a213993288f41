//! Data model shared by adapters, filters and the transfer orchestrator

pub mod filter;
pub mod info;
pub mod policy;
pub mod registry;
pub mod resource;

pub use filter::{Decoration, Filter, FilterStyle, FilterType, FilterValue};
pub use info::{
    AdapterPattern, CredentialFieldType, CredentialPattern, Endpoint, EndpointPattern, EndpointType,
    RegistryInfo, SupportedFilter, TriggerType,
};
pub use policy::{Policy, Trigger, TriggerSettings};
pub use registry::{Credential, CredentialType, HealthStatus, Registry, RegistryType};
pub use resource::{Artifact, Repository, Resource, ResourceMetadata, ResourceType};
