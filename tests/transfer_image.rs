mod common;

use common::*;
use registry_replicator::ReplicationError;
use registry_replicator::adapter::{AdapterContext, AdapterRegistry, ArtifactRegistry, native};
use registry_replicator::config::ReplicationConfig;
use registry_replicator::logging::Logger;
use registry_replicator::model::{Registry, RegistryType};
use registry_replicator::transfer::{Transfer, TransferContext, TransferOptions, TransferRegistry};
use std::sync::Arc;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPOSITORY: &str = "library/busybox";

fn image_transfer(ctx: TransferContext) -> Box<dyn Transfer> {
    TransferRegistry::builtin().create_by_name("image", ctx).unwrap()
}

#[tokio::test]
async fn test_copy_index_to_empty_destination() {
    let src = MemoryRegistry::new("https://src.example.com");
    let dst = MemoryRegistry::new("https://dst.example.com");
    let seeded = seed_index(&src, REPOSITORY, "latest", "amd64");
    let transfer = image_transfer(transfer_context(adapter_registry(&[&src, &dst]), None));

    transfer
        .transfer(&resource(&src, REPOSITORY, &["latest"]), &resource(&dst, REPOSITORY, &["latest"]))
        .await
        .unwrap();

    assert!(dst.has_blob(REPOSITORY, &seeded.config.digest));
    assert!(dst.has_blob(REPOSITORY, &seeded.layer.digest));
    assert!(dst.has_manifest(REPOSITORY, &seeded.child.digest));
    assert!(dst.has_manifest(REPOSITORY, &seeded.index.digest));
    assert_eq!(count(&dst.counters.blob_put), 2);
    assert_eq!(count(&dst.counters.manifest_put), 2);

    let descriptor = dst.manifest_exist(REPOSITORY, "latest").await.unwrap().unwrap();
    assert_eq!(descriptor.digest, seeded.index.digest);
}

#[tokio::test]
async fn test_second_copy_is_a_no_op() {
    let src = MemoryRegistry::new("https://src.example.com");
    let dst = MemoryRegistry::new("https://dst.example.com");
    seed_index(&src, REPOSITORY, "latest", "amd64");
    let transfer = image_transfer(transfer_context(adapter_registry(&[&src, &dst]), None));
    let (from, to) = (resource(&src, REPOSITORY, &["latest"]), resource(&dst, REPOSITORY, &["latest"]));

    transfer.transfer(&from, &to).await.unwrap();
    let blob_puts = count(&dst.counters.blob_put);
    let manifest_puts = count(&dst.counters.manifest_put);

    transfer.transfer(&from, &to).await.unwrap();
    assert_eq!(count(&dst.counters.blob_put), blob_puts);
    assert_eq!(count(&dst.counters.manifest_put), manifest_puts);
}

#[tokio::test]
async fn test_identical_destination_gets_no_puts() {
    let src = MemoryRegistry::new("https://src.example.com");
    let dst = MemoryRegistry::new("https://dst.example.com");
    seed_index(&src, REPOSITORY, "latest", "amd64");
    seed_index(&dst, REPOSITORY, "latest", "amd64");
    let transfer = image_transfer(transfer_context(adapter_registry(&[&src, &dst]), None));

    transfer
        .transfer(&resource(&src, REPOSITORY, &["latest"]), &resource(&dst, REPOSITORY, &["latest"]))
        .await
        .unwrap();

    assert_eq!(count(&dst.counters.blob_put), 0);
    assert_eq!(count(&dst.counters.manifest_put), 0);
    assert_eq!(count(&src.counters.blob_get), 0);
}

#[tokio::test]
async fn test_override_controls_digest_mismatch() {
    let src = MemoryRegistry::new("https://src.example.com");
    let dst = MemoryRegistry::new("https://dst.example.com");
    let wanted = seed_index(&src, REPOSITORY, "latest", "new");
    let stale = seed_index(&dst, REPOSITORY, "latest", "old");
    let transfer = image_transfer(transfer_context(adapter_registry(&[&src, &dst]), None));
    let from = resource(&src, REPOSITORY, &["latest"]);
    let mut to = resource(&dst, REPOSITORY, &["latest"]);

    transfer.transfer(&from, &to).await.unwrap();
    assert_eq!(count(&dst.counters.manifest_put), 0);
    assert_eq!(dst.tag_digest(REPOSITORY, "latest"), Some(stale.index.digest));

    to.override_existing = true;
    transfer.transfer(&from, &to).await.unwrap();
    assert!(count(&dst.counters.manifest_put) > 0);
    assert_eq!(dst.tag_digest(REPOSITORY, "latest"), Some(wanted.index.digest));
}

#[tokio::test]
async fn test_foreign_layers_are_not_copied() {
    let src = MemoryRegistry::new("https://src.example.com");
    let dst = MemoryRegistry::new("https://dst.example.com");
    let (layer, foreign) = seed_with_foreign_layer(&src, "windows/servercore", "ltsc");
    let transfer = image_transfer(transfer_context(adapter_registry(&[&src, &dst]), None));

    transfer
        .transfer(
            &resource(&src, "windows/servercore", &["ltsc"]),
            &resource(&dst, "windows/servercore", &["ltsc"]),
        )
        .await
        .unwrap();

    assert!(dst.has_blob("windows/servercore", &layer.digest));
    assert!(!dst.has_blob("windows/servercore", &foreign.digest));
    assert!(!src.blob_pulls().contains(&foreign.digest));
    assert_eq!(count(&dst.counters.blob_put), 2);
    assert!(dst.tag_digest("windows/servercore", "ltsc").is_some());
}

#[tokio::test]
async fn test_blob_copy_is_retried() {
    let src = MemoryRegistry::new("https://src.example.com");
    let dst = MemoryRegistry::new("https://dst.example.com");
    let seeded = seed_index(&src, REPOSITORY, "latest", "amd64");
    dst.fail_next_blob_pushes(2);
    let transfer = image_transfer(transfer_context(adapter_registry(&[&src, &dst]), None));

    transfer
        .transfer(&resource(&src, REPOSITORY, &["latest"]), &resource(&dst, REPOSITORY, &["latest"]))
        .await
        .unwrap();

    assert_eq!(count(&dst.counters.blob_put), 4);
    assert!(dst.has_blob(REPOSITORY, &seeded.config.digest));
    assert!(dst.has_manifest(REPOSITORY, &seeded.index.digest));
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_artifact() {
    let src = MemoryRegistry::new("https://src.example.com");
    let dst = MemoryRegistry::new("https://dst.example.com");
    seed_index(&src, REPOSITORY, "latest", "amd64");
    dst.fail_next_blob_pushes(100);
    let mut ctx = transfer_context(adapter_registry(&[&src, &dst]), None);
    ctx.options.blob_copy_retry = 3;
    let transfer = image_transfer(ctx);

    let err = transfer
        .transfer(&resource(&src, REPOSITORY, &["latest"]), &resource(&dst, REPOSITORY, &["latest"]))
        .await
        .unwrap_err();

    assert!(matches!(err, ReplicationError::Transport(_)));
    // the first blob exhausts its attempts and nothing after it is tried
    assert_eq!(count(&dst.counters.blob_put), 3);
    assert_eq!(count(&dst.counters.manifest_put), 0);
}

#[tokio::test]
async fn test_stopped_job_touches_nothing() {
    let src = MemoryRegistry::new("https://src.example.com");
    let dst = MemoryRegistry::new("https://dst.example.com");
    seed_index(&src, REPOSITORY, "latest", "amd64");
    let ctx = transfer_context(adapter_registry(&[&src, &dst]), Some(Arc::new(|| true)));

    let err = image_transfer(ctx)
        .transfer(&resource(&src, REPOSITORY, &["latest"]), &resource(&dst, REPOSITORY, &["latest"]))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(src.counters.total(), 0);
    assert_eq!(dst.counters.total(), 0);
}

#[tokio::test]
async fn test_stopped_job_sends_no_requests() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = AdapterContext::new(ReplicationConfig::default()).unwrap();
    let adapters = AdapterRegistry::new();
    native::register(&adapters, &ctx).unwrap();
    let registry = Registry::new("upstream", RegistryType::DOCKER_REGISTRY, server.uri());
    let mut src = resource(&MemoryRegistry::new("https://unused.example.com"), REPOSITORY, &["latest"]);
    src.registry = registry.clone();
    let mut dst = src.clone();
    dst.metadata.repository.name = "mirror/busybox".into();

    let transfer = image_transfer(TransferContext::new(
        Arc::new(adapters),
        Logger::new_quiet(),
        Arc::new(|| true),
        TransferOptions::default(),
    ));
    let err = transfer.transfer(&src, &dst).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_delete_tags_ignores_missing() {
    let dst = MemoryRegistry::new("https://dst.example.com");
    seed_index(&dst, REPOSITORY, "v1", "amd64");
    let transfer = image_transfer(transfer_context(adapter_registry(&[&dst]), None));
    let mut target = resource(&dst, REPOSITORY, &["v1", "v2"]);
    target.deleted = true;
    target.is_delete_tag = true;

    transfer.transfer(&target, &target).await.unwrap();

    assert_eq!(count(&dst.counters.tag_delete), 2);
    assert_eq!(dst.tag_digest(REPOSITORY, "v1"), None);
    assert_eq!(count(&dst.counters.manifest_delete), 0);
}

#[tokio::test]
async fn test_delete_artifact_by_resolved_digest() {
    let dst = MemoryRegistry::new("https://dst.example.com");
    let seeded = seed_index(&dst, REPOSITORY, "v1", "amd64");
    let transfer = image_transfer(transfer_context(adapter_registry(&[&dst]), None));
    let mut target = resource(&dst, REPOSITORY, &["v1", "missing"]);
    target.deleted = true;

    transfer.transfer(&target, &target).await.unwrap();

    assert_eq!(count(&dst.counters.manifest_delete), 1);
    assert!(!dst.has_manifest(REPOSITORY, &seeded.index.digest));
    assert_eq!(dst.tag_digest(REPOSITORY, "v1"), None);
}
