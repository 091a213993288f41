//! Registry Replicator Library
//!
//! Replication core for moving container images, OCI artifacts and Helm
//! charts between registries. Adapters translate each registry product's
//! API into a common contract, the filter engine narrows what gets copied,
//! and the transfer orchestrator walks manifests and blobs between an
//! adapter pair.

pub mod error;
pub mod logging;
pub mod config;
pub mod digest;
pub mod model;
pub mod util;
pub mod http;
pub mod auth;
pub mod registry;
pub mod adapter;
pub mod filter;
pub mod transfer;
pub mod cli;

pub use config::ReplicationConfig;
pub use error::{ReplicationError, Result};
