//! Transfer orchestrator
//!
//! A [`Transfer`] moves one source [`Resource`] to its destination, or
//! deletes the destination when it is marked deleted. Implementations exist
//! per resource type and are looked up through a [`TransferRegistry`].
//! Every network step first consults the job's stop probe; a stopped job
//! ends with [`ReplicationError::Cancelled`].

pub mod chart;
pub mod image;
pub mod speed;

pub use chart::ChartTransfer;
pub use image::ImageTransfer;

use crate::adapter::{Adapter, AdapterRegistry};
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::logging::Logger;
use crate::model::{Resource, ResourceType};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// First wait between two blob copy attempts; doubled after every failure
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Cancellation probe supplied by the job runner
pub type StopFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// A probe that never stops
pub fn never_stop() -> StopFn {
    Arc::new(|| false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Attempts per blob, at least one
    pub blob_copy_retry: u32,
    pub initial_backoff: Duration,
    /// Blob bandwidth cap in KiB/s; `None` or zero means unlimited
    pub speed_kb_per_sec: Option<u32>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            blob_copy_retry: crate::config::DEFAULT_BLOB_COPY_RETRY,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            speed_kb_per_sec: None,
        }
    }
}

impl TransferOptions {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            blob_copy_retry: config.blob_copy_retry,
            ..Self::default()
        }
    }

    pub fn with_speed_limit(mut self, kb_per_sec: Option<u32>) -> Self {
        self.speed_kb_per_sec = kb_per_sec.filter(|s| *s > 0);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }
}

/// Everything a transfer needs from its job
#[derive(Clone)]
pub struct TransferContext {
    pub adapters: Arc<AdapterRegistry>,
    pub logger: Logger,
    pub stopped: StopFn,
    pub options: TransferOptions,
}

impl TransferContext {
    pub fn new(adapters: Arc<AdapterRegistry>, logger: Logger, stopped: StopFn, options: TransferOptions) -> Self {
        Self {
            adapters,
            logger,
            stopped,
            options,
        }
    }

    /// `Err(Cancelled)` once the job has been asked to stop
    pub fn check_stopped(&self) -> Result<()> {
        if (self.stopped)() {
            self.logger.info("the job is stopped");
            return Err(ReplicationError::Cancelled);
        }
        Ok(())
    }

    /// Builds the adapter for the resource's registry; any failure is fatal for the job
    pub async fn adapter_for(&self, resource: &Resource) -> Result<Arc<dyn Adapter>> {
        self.adapters
            .create_adapter(&resource.registry)
            .await
            .map_err(|e| match e {
                ReplicationError::Cancelled => e,
                other => ReplicationError::Fatal(format!(
                    "failed to create adapter for {}: {}",
                    resource.registry.url, other
                )),
            })
    }
}

#[async_trait]
pub trait Transfer: Send + Sync {
    /// Copies `src` to `dst`, or deletes `dst` when it is marked deleted
    async fn transfer(&self, src: &Resource, dst: &Resource) -> Result<()>;
}

pub type TransferConstructor = fn(TransferContext) -> Box<dyn Transfer>;

/// Resource type to transfer implementation
#[derive(Default)]
pub struct TransferRegistry {
    constructors: BTreeMap<ResourceType, TransferConstructor>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifacts (images included) and charts
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.constructors.insert(ResourceType::Artifact, |ctx| Box::new(ImageTransfer::new(ctx)));
        registry.constructors.insert(ResourceType::Chart, |ctx| Box::new(ChartTransfer::new(ctx)));
        registry
    }

    pub fn register(&mut self, resource_type: ResourceType, constructor: TransferConstructor) -> Result<()> {
        if self.constructors.contains_key(&resource_type) {
            return Err(ReplicationError::invalid(format!(
                "transfer for {} already registered",
                resource_type
            )));
        }
        self.constructors.insert(resource_type, constructor);
        Ok(())
    }

    pub fn create(&self, resource_type: ResourceType, ctx: TransferContext) -> Result<Box<dyn Transfer>> {
        let constructor = self
            .constructors
            .get(&resource_type)
            .ok_or_else(|| ReplicationError::invalid(format!("no transfer registered for {}", resource_type)))?;
        Ok(constructor(ctx))
    }

    /// Accepts the external names, `image` included
    pub fn create_by_name(&self, resource_type: &str, ctx: TransferContext) -> Result<Box<dyn Transfer>> {
        self.create(resource_type.parse()?, ctx)
    }
}
