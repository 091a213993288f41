//! Helm chart transfer: opaque archives moved version by version

use crate::adapter::ChartRegistry;
use crate::adapter::harbor::chart::content_url;
use crate::error::{ReplicationError, Result};
use crate::model::Resource;
use crate::transfer::speed::throttle;
use crate::transfer::{Transfer, TransferContext};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ChartTransfer {
    ctx: TransferContext,
}

impl ChartTransfer {
    pub fn new(ctx: TransferContext) -> Self {
        Self { ctx }
    }

    async fn chart_registry(&self, resource: &Resource) -> Result<Arc<dyn ChartRegistry>> {
        self.ctx.adapter_for(resource).await?.as_chart_registry().ok_or_else(|| {
            ReplicationError::Fatal(format!("registry {} does not support charts", resource.registry.url))
        })
    }

    async fn delete(&self, dst: &dyn ChartRegistry, resource: &Resource) -> Result<()> {
        let name = resource.repository();
        let mut last_error = None;
        for version in resource.metadata.references() {
            self.ctx.check_stopped()?;
            let result = match dst.chart_exist(name, &version).await {
                Ok(false) => {
                    self.ctx.logger.warning(&format!("chart {}:{} not found, skip", name, version));
                    continue;
                }
                Ok(true) => {
                    self.ctx.check_stopped()?;
                    dst.delete_chart(name, &version).await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => self.ctx.logger.info(&format!("chart {}:{} deleted", name, version)),
                Err(e) => {
                    self.ctx
                        .logger
                        .error(&format!("failed to delete chart {}:{}: {}", name, version, e));
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    async fn copy_version(
        &self,
        src: &dyn ChartRegistry,
        src_resource: &Resource,
        dst: &dyn ChartRegistry,
        dst_resource: &Resource,
        version: &str,
    ) -> Result<()> {
        let src_name = src_resource.repository();
        let dst_name = dst_resource.repository();

        self.ctx.check_stopped()?;
        if dst.chart_exist(dst_name, version).await? && !dst_resource.override_existing {
            self.ctx.logger.warning(&format!(
                "chart {}:{} already exists and override is disabled, skip",
                dst_name, version
            ));
            return Ok(());
        }

        self.ctx.check_stopped()?;
        let stream = src
            .download_chart(src_name, version, content_url(src_resource, version))
            .await?;
        let stream = match self.ctx.options.speed_kb_per_sec {
            Some(limit) => throttle(stream, limit),
            None => stream,
        };

        self.ctx.check_stopped()?;
        dst.upload_chart(dst_name, version, stream).await?;
        self.ctx
            .logger
            .success(&format!("chart {}:{} copied to {}:{}", src_name, version, dst_name, version));
        Ok(())
    }
}

#[async_trait]
impl Transfer for ChartTransfer {
    async fn transfer(&self, src: &Resource, dst: &Resource) -> Result<()> {
        self.ctx.check_stopped()?;

        if dst.deleted {
            let destination = self.chart_registry(dst).await?;
            return self.delete(destination.as_ref(), dst).await;
        }

        let source = self.chart_registry(src).await?;
        let destination = self.chart_registry(dst).await?;
        let mut last_error = None;
        for version in src.metadata.references() {
            match self
                .copy_version(source.as_ref(), src, destination.as_ref(), dst, &version)
                .await
            {
                Ok(()) => {}
                Err(ReplicationError::Cancelled) => return Err(ReplicationError::Cancelled),
                Err(e) => {
                    self.ctx.logger.error(&format!(
                        "failed to copy chart {}:{}: {}",
                        src.repository(),
                        version,
                        e
                    ));
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(()), Err)
    }
}
