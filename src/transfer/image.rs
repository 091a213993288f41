//! Image and OCI artifact transfer
//!
//! References are copied one after another. For each one the source
//! manifest is pulled, compared with the destination, and when a copy is
//! needed its graph is walked depth first: child manifests recursively,
//! blobs through mount or pull/push, foreign layers never. The manifest
//! itself is pushed last so the destination never references missing
//! content.

use crate::adapter::ArtifactRegistry;
use crate::error::{ReplicationError, Result};
use crate::model::Resource;
use crate::registry::manifest::{ACCEPTED_MEDIA_TYPES, MEDIA_TYPE_FOREIGN_LAYER, is_manifest_media_type};
use crate::registry::{Descriptor, Manifest};
use crate::transfer::speed::throttle;
use crate::transfer::{Transfer, TransferContext};
use crate::digest::DigestUtils;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;

pub struct ImageTransfer {
    ctx: TransferContext,
}

impl ImageTransfer {
    pub fn new(ctx: TransferContext) -> Self {
        Self { ctx }
    }

    async fn artifact_registry(&self, resource: &Resource) -> Result<Arc<dyn ArtifactRegistry>> {
        self.ctx.adapter_for(resource).await?.as_artifact_registry().ok_or_else(|| {
            ReplicationError::Fatal(format!(
                "registry {} does not support artifacts",
                resource.registry.url
            ))
        })
    }

    async fn delete(&self, dst: &dyn ArtifactRegistry, resource: &Resource) -> Result<()> {
        let logger = &self.ctx.logger;
        let repository = resource.repository();
        let mut last_error = None;

        if resource.is_delete_tag {
            for tag in resource.metadata.artifacts.iter().flat_map(|a| a.tags.iter()) {
                self.ctx.check_stopped()?;
                match dst.delete_tag(repository, tag).await {
                    Ok(()) => logger.info(&format!("tag {}:{} deleted", repository, tag)),
                    Err(e) if e.is_not_found() => {
                        logger.warning(&format!("tag {}:{} not found, skip", repository, tag));
                    }
                    Err(e) => {
                        logger.error(&format!("failed to delete tag {}:{}: {}", repository, tag, e));
                        last_error = Some(e);
                    }
                }
            }
        } else {
            for reference in resource.metadata.references() {
                self.ctx.check_stopped()?;
                let result = match dst.manifest_exist(repository, &reference).await {
                    Ok(None) => {
                        logger.warning(&format!("artifact {}:{} not found, skip", repository, reference));
                        continue;
                    }
                    Ok(Some(descriptor)) => {
                        // the distribution API only deletes manifests by digest
                        let target = if DigestUtils::is_digest(&reference) {
                            reference.clone()
                        } else {
                            descriptor.digest
                        };
                        self.ctx.check_stopped()?;
                        dst.delete_manifest(repository, &target).await
                    }
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => logger.info(&format!("artifact {}:{} deleted", repository, reference)),
                    Err(e) if e.is_not_found() => {
                        logger.warning(&format!("artifact {}:{} not found, skip", repository, reference));
                    }
                    Err(e) => {
                        logger.error(&format!("failed to delete artifact {}:{}: {}", repository, reference, e));
                        last_error = Some(e);
                    }
                }
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    async fn copy(
        &self,
        src: &dyn ArtifactRegistry,
        src_resource: &Resource,
        dst: &dyn ArtifactRegistry,
        dst_resource: &Resource,
    ) -> Result<()> {
        let src_repository = src_resource.repository();
        let dst_repository = dst_resource.repository();
        let mut last_error = None;
        for reference in src_resource.metadata.references() {
            let result = self
                .copy_artifact(
                    src,
                    src_repository,
                    &reference,
                    dst,
                    dst_repository,
                    &reference,
                    dst_resource.override_existing,
                )
                .await;
            match result {
                Ok(()) => {}
                Err(ReplicationError::Cancelled) => return Err(ReplicationError::Cancelled),
                Err(e) => {
                    self.ctx.logger.error(&format!(
                        "failed to copy {}:{} to {}:{}: {}",
                        src_repository, reference, dst_repository, reference, e
                    ));
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    /// Copies one manifest and everything it references
    #[allow(clippy::too_many_arguments)]
    fn copy_artifact<'a>(
        &'a self,
        src: &'a dyn ArtifactRegistry,
        src_repository: &'a str,
        src_reference: &'a str,
        dst: &'a dyn ArtifactRegistry,
        dst_repository: &'a str,
        dst_reference: &'a str,
        override_existing: bool,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let logger = &self.ctx.logger;
            logger.info(&format!(
                "copying {}:{} to {}:{}",
                src_repository, src_reference, dst_repository, dst_reference
            ));

            self.ctx.check_stopped()?;
            let (manifest, digest) = src
                .pull_manifest(src_repository, src_reference, &ACCEPTED_MEDIA_TYPES)
                .await?;

            self.ctx.check_stopped()?;
            match dst.manifest_exist(dst_repository, dst_reference).await? {
                Some(existing) if existing.digest == digest => {
                    logger.info(&format!(
                        "{}:{} already exists with digest {}, skip",
                        dst_repository, dst_reference, digest
                    ));
                    return Ok(());
                }
                Some(existing) if !override_existing => {
                    logger.warning(&format!(
                        "{}:{} exists with a different digest {}, override disabled, skip",
                        dst_repository, dst_reference, existing.digest
                    ));
                    return Ok(());
                }
                _ => {}
            }

            self.copy_content(src, src_repository, dst, dst_repository, &manifest)
                .await?;

            self.ctx.check_stopped()?;
            dst.push_manifest(dst_repository, dst_reference, &manifest.media_type, manifest.payload.clone())
                .await?;
            logger.success(&format!(
                "copied {}:{} to {}:{}",
                src_repository, src_reference, dst_repository, dst_reference
            ));
            Ok(())
        }
        .boxed()
    }

    /// Children in declaration order; any failure aborts the manifest
    async fn copy_content(
        &self,
        src: &dyn ArtifactRegistry,
        src_repository: &str,
        dst: &dyn ArtifactRegistry,
        dst_repository: &str,
        manifest: &Manifest,
    ) -> Result<()> {
        for descriptor in manifest.references() {
            if is_manifest_media_type(&descriptor.media_type) {
                // children are addressed by digest and always overwritten
                self.copy_artifact(
                    src,
                    src_repository,
                    &descriptor.digest,
                    dst,
                    dst_repository,
                    &descriptor.digest,
                    true,
                )
                .await?;
            } else if descriptor.media_type == MEDIA_TYPE_FOREIGN_LAYER {
                self.ctx
                    .logger
                    .debug(&format!("foreign layer {} is not copied", descriptor.digest));
            } else {
                self.copy_blob(src, src_repository, dst, dst_repository, descriptor)
                    .await?;
            }
        }
        Ok(())
    }

    async fn copy_blob(
        &self,
        src: &dyn ArtifactRegistry,
        src_repository: &str,
        dst: &dyn ArtifactRegistry,
        dst_repository: &str,
        descriptor: &Descriptor,
    ) -> Result<()> {
        let logger = &self.ctx.logger;
        let digest = descriptor.digest.as_str();

        self.ctx.check_stopped()?;
        if dst.blob_exist(dst_repository, digest).await? {
            logger.debug(&format!("blob {} already exists in {}, skip", digest, dst_repository));
            return Ok(());
        }

        self.ctx.check_stopped()?;
        if let Some(mount_from) = dst.can_be_mount(digest).await? {
            self.ctx.check_stopped()?;
            if dst.mount_blob(&mount_from, digest, dst_repository).await? {
                logger.info(&format!("blob {} mounted from {} to {}", digest, mount_from, dst_repository));
                return Ok(());
            }
            logger.debug(&format!("mount of blob {} not honored, copying", digest));
        }

        let attempts = self.ctx.options.blob_copy_retry.max(1);
        let mut backoff = self.ctx.options.initial_backoff;
        let mut attempt = 1;
        loop {
            self.ctx.check_stopped()?;
            match self
                .copy_blob_once(src, src_repository, dst, dst_repository, descriptor)
                .await
            {
                Ok(()) => return Ok(()),
                Err(ReplicationError::Cancelled) => return Err(ReplicationError::Cancelled),
                Err(e) if attempt < attempts => {
                    logger.warning(&format!(
                        "copy of blob {} failed on attempt {} of {}: {}, retrying in {:?}",
                        digest, attempt, attempts, e, backoff
                    ));
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("copy blob {} after {} attempts", digest, attempts)));
                }
            }
        }
    }

    async fn copy_blob_once(
        &self,
        src: &dyn ArtifactRegistry,
        src_repository: &str,
        dst: &dyn ArtifactRegistry,
        dst_repository: &str,
        descriptor: &Descriptor,
    ) -> Result<()> {
        let (size, stream) = src.pull_blob(src_repository, &descriptor.digest).await?;
        // some registries omit the length on blob pulls
        let size = if size == 0 { descriptor.size } else { size };
        let stream = match self.ctx.options.speed_kb_per_sec {
            Some(limit) => throttle(stream, limit),
            None => stream,
        };
        self.ctx.check_stopped()?;
        dst.push_blob(dst_repository, &descriptor.digest, size, stream).await?;
        self.ctx.logger.detail(&format!(
            "blob {} ({}) copied",
            descriptor.digest,
            self.ctx.logger.format_size(size)
        ));
        Ok(())
    }
}

#[async_trait]
impl Transfer for ImageTransfer {
    async fn transfer(&self, src: &Resource, dst: &Resource) -> Result<()> {
        self.ctx.check_stopped()?;

        if dst.deleted {
            let destination = self.artifact_registry(dst).await?;
            return self.delete(destination.as_ref(), dst).await;
        }

        let source = self.artifact_registry(src).await?;
        let destination = self.artifact_registry(dst).await?;
        self.copy(source.as_ref(), src, destination.as_ref(), dst).await
    }
}
