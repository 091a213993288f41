//! Command runner wiring the library together

use crate::adapter::{AdapterContext, AdapterRegistry, builtin_registry};
use crate::cli::args::{Args, Command, FilterArgs, TargetArgs, parse_registry};
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::logging::Logger;
use crate::model::{Artifact, Registry, Resource, ResourceMetadata, ResourceType};
use crate::transfer::{StopFn, TransferContext, TransferOptions, TransferRegistry};
use crate::digest::DigestUtils;
use crate::adapter::native::ARTIFACT_TYPE_IMAGE;
use crate::adapter::harbor::chart::ARTIFACT_TYPE_CHART;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct Runner {
    args: Args,
    logger: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let logger = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };
        Ok(Self { args, logger })
    }

    pub async fn run(&self) -> Result<()> {
        let config = ReplicationConfig::from_env();
        config.validate()?;
        let config_for_transfer = TransferOptions::from_config(&config);
        let ctx = AdapterContext::new(config)?;
        let adapters = Arc::new(builtin_registry(&ctx)?);

        match &self.args.command {
            Command::Adapters => self.adapters(&adapters),
            Command::Health { registry } => self.health(&adapters, &parse_registry(registry)?).await,
            Command::List {
                registry,
                filters,
                charts,
            } => self.list(&adapters, &parse_registry(registry)?, filters, *charts).await,
            Command::Copy {
                src,
                dst,
                target,
                dst_repository,
                override_existing,
                speed,
            } => {
                let src = resource(parse_registry(src)?, target, &target.repository);
                let dst_name = dst_repository.as_deref().unwrap_or(&target.repository);
                let mut dst = resource(parse_registry(dst)?, target, dst_name);
                dst.override_existing = *override_existing;
                let options = config_for_transfer.with_speed_limit(*speed);
                self.copy(adapters, src, dst, options).await
            }
            Command::Delete {
                registry,
                target,
                tag_only,
            } => {
                let mut dst = resource(parse_registry(registry)?, target, &target.repository);
                dst.deleted = true;
                dst.is_delete_tag = *tag_only;
                let src = dst.clone();
                self.run_transfer(adapters, src, dst, config_for_transfer).await
            }
        }
    }

    fn adapters(&self, adapters: &AdapterRegistry) -> Result<()> {
        let output = json!({
            "types": adapters.list_types(),
            "patterns": adapters.adapter_patterns(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    async fn health(&self, adapters: &AdapterRegistry, registry: &Registry) -> Result<()> {
        let adapter = adapters.create_adapter(registry).await?;
        let status = adapter.health_check().await?;
        self.logger.info(&format!("registry {} is {}", registry.url, status));
        println!("{}", status);
        Ok(())
    }

    async fn list(&self, adapters: &AdapterRegistry, registry: &Registry, filters: &FilterArgs, charts: bool) -> Result<()> {
        let filters = filters.to_filters();
        for filter in &filters {
            filter.validate()?;
        }
        let adapter = adapters.create_adapter(registry).await?;
        let resources = if charts {
            adapter
                .as_chart_registry()
                .ok_or_else(|| ReplicationError::invalid(format!("{} does not host charts", registry.registry_type)))?
                .fetch_charts(&filters)
                .await?
        } else {
            adapter
                .as_artifact_registry()
                .ok_or_else(|| ReplicationError::invalid(format!("{} does not host artifacts", registry.registry_type)))?
                .fetch_artifacts(&filters)
                .await?
        };
        self.logger.info(&format!("{} resources found", resources.len()));
        let listing: Vec<_> = resources
            .iter()
            .map(|r| json!({"repository": r.repository(), "artifacts": r.metadata.artifacts}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        Ok(())
    }

    async fn copy(&self, adapters: Arc<AdapterRegistry>, src: Resource, dst: Resource, options: TransferOptions) -> Result<()> {
        if dst.resource_type == ResourceType::Artifact {
            self.logger.step("Preparing destination repositories");
            adapters
                .create_adapter(&dst.registry)
                .await?
                .prepare_for_push(std::slice::from_ref(&dst))
                .await?;
        }
        self.run_transfer(adapters, src, dst, options).await
    }

    async fn run_transfer(&self, adapters: Arc<AdapterRegistry>, src: Resource, dst: Resource, options: TransferOptions) -> Result<()> {
        let ctx = TransferContext::new(adapters, self.logger.clone(), interrupt_probe(), options);
        let transfer = TransferRegistry::builtin().create(dst.resource_type, ctx)?;
        transfer.transfer(&src, &dst).await?;
        self.logger.success(&format!(
            "Operation completed successfully in {}",
            self.logger.format_duration(self.logger.elapsed())
        ));
        Ok(())
    }
}

/// Builds the resource addressed by the command line
fn resource(registry: Registry, target: &TargetArgs, repository: &str) -> Resource {
    let (resource_type, artifact_type) = if target.chart {
        (ResourceType::Chart, ARTIFACT_TYPE_CHART)
    } else {
        (ResourceType::Artifact, ARTIFACT_TYPE_IMAGE)
    };
    let mut metadata = ResourceMetadata::new(repository);
    metadata.artifacts = target
        .references
        .iter()
        .map(|reference| {
            if DigestUtils::is_digest(reference) {
                Artifact::tagged(artifact_type, Vec::new()).with_digest(reference.clone())
            } else {
                Artifact::tagged(artifact_type, vec![reference.clone()])
            }
        })
        .collect();
    Resource::new(resource_type, metadata, registry)
}

/// Stop probe flipped by Ctrl-C
fn interrupt_probe() -> StopFn {
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            flag.store(true, Ordering::SeqCst);
        }
    });
    Arc::new(move || stopped.load(Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RegistryType;

    #[test]
    fn test_resource_from_target() {
        let target = TargetArgs {
            repository: "library/busybox".into(),
            references: vec!["latest".into(), format!("sha256:{}", "a".repeat(64))],
            chart: false,
        };
        let registry = Registry::new("r", RegistryType::DOCKER_REGISTRY, "http://localhost:5000");
        let resource = resource(registry, &target, "mirror/busybox");
        assert_eq!(resource.repository(), "mirror/busybox");
        assert_eq!(resource.resource_type, ResourceType::Artifact);
        assert_eq!(resource.metadata.references().len(), 2);
        assert_eq!(resource.metadata.artifacts[1].tags.len(), 0);
    }
}
