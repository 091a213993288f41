//! In-memory registry used by the transfer tests
//!
//! Stores manifests and blobs per repository and counts every operation so
//! tests can assert on what the orchestrator asked for.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use registry_replicator::adapter::{Adapter, AdapterRegistry, ArtifactRegistry, Factory};
use registry_replicator::digest::DigestUtils;
use registry_replicator::logging::Logger;
use registry_replicator::model::{
    Artifact, Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceMetadata, ResourceType,
};
use registry_replicator::registry::manifest::{
    MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_FOREIGN_LAYER, MEDIA_TYPE_OCI_INDEX,
};
use registry_replicator::registry::{BlobStream, Descriptor, Manifest};
use registry_replicator::transfer::{StopFn, TransferContext, TransferOptions, never_stop};
use registry_replicator::{ReplicationError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const MEMORY: RegistryType = RegistryType::from_static("memory");

pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const MEDIA_TYPE_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

#[derive(Default)]
pub struct Counters {
    pub manifest_exist: AtomicUsize,
    pub manifest_get: AtomicUsize,
    pub manifest_put: AtomicUsize,
    pub manifest_delete: AtomicUsize,
    pub blob_exist: AtomicUsize,
    pub blob_get: AtomicUsize,
    pub blob_put: AtomicUsize,
    pub tag_delete: AtomicUsize,
}

impl Counters {
    pub fn total(&self) -> usize {
        [
            &self.manifest_exist,
            &self.manifest_get,
            &self.manifest_put,
            &self.manifest_delete,
            &self.blob_exist,
            &self.blob_get,
            &self.blob_put,
            &self.tag_delete,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

#[derive(Default)]
struct Store {
    // (repository, digest) -> (media type, payload)
    manifests: HashMap<(String, String), (String, Bytes)>,
    // (repository, tag) -> digest
    tags: HashMap<(String, String), String>,
    // (repository, digest) -> content
    blobs: HashMap<(String, String), Bytes>,
    // digests whose pull is recorded per digest
    blob_pulls: Vec<String>,
}

pub struct MemoryRegistry {
    pub registry: Registry,
    pub counters: Counters,
    store: Mutex<Store>,
    failing_blob_pushes: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            registry: Registry::new(url, MEMORY, url),
            counters: Counters::default(),
            store: Mutex::new(Store::default()),
            failing_blob_pushes: AtomicUsize::new(0),
        })
    }

    /// Makes the next `n` blob pushes fail with a transport error
    pub fn fail_next_blob_pushes(&self, n: usize) {
        self.failing_blob_pushes.store(n, Ordering::SeqCst);
    }

    pub fn put_blob(&self, repository: &str, content: &[u8]) -> Descriptor {
        let digest = DigestUtils::compute_digest(content);
        self.store.lock().blobs.insert(
            (repository.to_string(), digest.clone()),
            Bytes::copy_from_slice(content),
        );
        Descriptor::new(MEDIA_TYPE_LAYER, digest, content.len() as u64)
    }

    pub fn put_manifest(&self, repository: &str, reference: Option<&str>, media_type: &str, payload: &[u8]) -> Descriptor {
        let digest = DigestUtils::compute_digest(payload);
        let mut store = self.store.lock();
        store.manifests.insert(
            (repository.to_string(), digest.clone()),
            (media_type.to_string(), Bytes::copy_from_slice(payload)),
        );
        if let Some(tag) = reference {
            store.tags.insert((repository.to_string(), tag.to_string()), digest.clone());
        }
        Descriptor::new(media_type, digest, payload.len() as u64)
    }

    pub fn has_blob(&self, repository: &str, digest: &str) -> bool {
        self.store
            .lock()
            .blobs
            .contains_key(&(repository.to_string(), digest.to_string()))
    }

    pub fn has_manifest(&self, repository: &str, digest: &str) -> bool {
        self.store
            .lock()
            .manifests
            .contains_key(&(repository.to_string(), digest.to_string()))
    }

    pub fn tag_digest(&self, repository: &str, tag: &str) -> Option<String> {
        self.store
            .lock()
            .tags
            .get(&(repository.to_string(), tag.to_string()))
            .cloned()
    }

    pub fn blob_pulls(&self) -> Vec<String> {
        self.store.lock().blob_pulls.clone()
    }

    fn resolve(&self, repository: &str, reference: &str) -> Option<String> {
        let store = self.store.lock();
        if DigestUtils::is_digest(reference) {
            store
                .manifests
                .contains_key(&(repository.to_string(), reference.to_string()))
                .then(|| reference.to_string())
        } else {
            store.tags.get(&(repository.to_string(), reference.to_string())).cloned()
        }
    }

    fn not_found(what: &str) -> ReplicationError {
        ReplicationError::NotFound(format!("{} not found", what))
    }
}

#[async_trait]
impl Adapter for MemoryRegistry {
    fn info(&self) -> RegistryInfo {
        RegistryInfo::artifact(MEMORY, "in-memory registry")
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }

    fn as_artifact_registry(self: Arc<Self>) -> Option<Arc<dyn ArtifactRegistry>> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for MemoryRegistry {
    async fn fetch_artifacts(&self, _filters: &[Filter]) -> Result<Vec<Resource>> {
        let store = self.store.lock();
        let mut by_repository: HashMap<String, Vec<String>> = HashMap::new();
        for (repository, tag) in store.tags.keys() {
            by_repository.entry(repository.clone()).or_default().push(tag.clone());
        }
        Ok(by_repository
            .into_iter()
            .map(|(repository, tags)| {
                let mut metadata = ResourceMetadata::new(repository);
                metadata.artifacts = vec![Artifact::tagged("image", tags)];
                Resource::new(ResourceType::Artifact, metadata, self.registry.clone())
            })
            .collect())
    }

    async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<Descriptor>> {
        self.counters.manifest_exist.fetch_add(1, Ordering::SeqCst);
        let Some(digest) = self.resolve(repository, reference) else {
            return Ok(None);
        };
        let store = self.store.lock();
        Ok(store
            .manifests
            .get(&(repository.to_string(), digest.clone()))
            .map(|(media_type, payload)| Descriptor::new(media_type.clone(), digest, payload.len() as u64)))
    }

    async fn pull_manifest(&self, repository: &str, reference: &str, _accepted: &[&str]) -> Result<(Manifest, String)> {
        self.counters.manifest_get.fetch_add(1, Ordering::SeqCst);
        let digest = self
            .resolve(repository, reference)
            .ok_or_else(|| Self::not_found(&format!("manifest {}:{}", repository, reference)))?;
        let (media_type, payload) = self
            .store
            .lock()
            .manifests
            .get(&(repository.to_string(), digest.clone()))
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("manifest {}", digest)))?;
        Ok((Manifest::parse(Some(&media_type), payload)?, digest))
    }

    async fn push_manifest(&self, repository: &str, reference: &str, media_type: &str, payload: Bytes) -> Result<String> {
        self.counters.manifest_put.fetch_add(1, Ordering::SeqCst);
        let tag = (!DigestUtils::is_digest(reference)).then_some(reference);
        Ok(self.put_manifest(repository, tag, media_type, &payload).digest)
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        self.counters.manifest_delete.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.lock();
        store.manifests.remove(&(repository.to_string(), reference.to_string()));
        store.tags.retain(|(repo, _), digest| !(repo == repository && digest == reference));
        Ok(())
    }

    async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool> {
        self.counters.blob_exist.fetch_add(1, Ordering::SeqCst);
        Ok(self.has_blob(repository, digest))
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<(u64, BlobStream)> {
        self.counters.blob_get.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.lock();
        store.blob_pulls.push(digest.to_string());
        let content = store
            .blobs
            .get(&(repository.to_string(), digest.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("blob {}", digest)))?;
        let size = content.len() as u64;
        Ok((size, futures::stream::iter(vec![Ok(content)]).boxed()))
    }

    async fn push_blob(&self, repository: &str, digest: &str, _size: u64, blob: BlobStream) -> Result<()> {
        self.counters.blob_put.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_blob_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ReplicationError::Transport("connection reset".to_string()));
        }
        let chunks: Vec<Bytes> = blob.try_collect().await?;
        let content = Bytes::from(chunks.concat());
        DigestUtils::verify(&content, digest)?;
        self.store
            .lock()
            .blobs
            .insert((repository.to_string(), digest.to_string()), content);
        Ok(())
    }

    async fn mount_blob(&self, _source_repository: &str, _digest: &str, _repository: &str) -> Result<bool> {
        Ok(false)
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        self.counters.tag_delete.fetch_add(1, Ordering::SeqCst);
        match self.store.lock().tags.remove(&(repository.to_string(), tag.to_string())) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(&format!("tag {}:{}", repository, tag))),
        }
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .lock()
            .tags
            .keys()
            .filter(|(repo, _)| repo == repository)
            .map(|(_, tag)| tag.clone())
            .collect())
    }
}

/// Hands out the registered in-memory registries by URL
pub struct MemoryFactory {
    registries: HashMap<String, Arc<MemoryRegistry>>,
}

#[async_trait]
impl Factory for MemoryFactory {
    async fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let adapter: Arc<dyn Adapter> = self
            .registries
            .get(&registry.url)
            .cloned()
            .ok_or_else(|| ReplicationError::invalid(format!("no memory registry at {}", registry.url)))?;
        Ok(adapter)
    }
}

pub fn adapter_registry(registries: &[&Arc<MemoryRegistry>]) -> Arc<AdapterRegistry> {
    let factory = MemoryFactory {
        registries: registries
            .iter()
            .map(|r| (r.registry.url.clone(), Arc::clone(r)))
            .collect(),
    };
    let adapters = AdapterRegistry::new();
    adapters
        .register(MEMORY, Arc::new(factory))
        .expect("register memory factory");
    Arc::new(adapters)
}

pub fn transfer_context(adapters: Arc<AdapterRegistry>, stopped: Option<StopFn>) -> TransferContext {
    let options = TransferOptions::default().with_initial_backoff(Duration::from_millis(1));
    TransferContext::new(
        adapters,
        Logger::new_quiet(),
        stopped.unwrap_or_else(never_stop),
        options,
    )
}

pub fn resource(registry: &MemoryRegistry, repository: &str, tags: &[&str]) -> Resource {
    let mut metadata = ResourceMetadata::new(repository);
    metadata.artifacts = vec![Artifact::tagged(
        "image",
        tags.iter().map(|t| t.to_string()).collect(),
    )];
    Resource::new(ResourceType::Artifact, metadata, registry.registry.clone())
}

/// An image manifest with one config and the given layers
pub fn image_manifest(config: &Descriptor, layers: &[Descriptor]) -> Vec<u8> {
    let layers: Vec<_> = layers
        .iter()
        .map(|l| serde_json::json!({"mediaType": l.media_type, "digest": l.digest, "size": l.size}))
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_DOCKER_MANIFEST,
        "config": {"mediaType": MEDIA_TYPE_CONFIG, "digest": config.digest, "size": config.size},
        "layers": layers,
    }))
    .expect("serialize manifest")
}

pub fn image_index(children: &[Descriptor]) -> Vec<u8> {
    let manifests: Vec<_> = children
        .iter()
        .map(|c| {
            serde_json::json!({
                "mediaType": c.media_type,
                "digest": c.digest,
                "size": c.size,
                "platform": {"architecture": "amd64", "os": "linux"},
            })
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_INDEX,
        "manifests": manifests,
    }))
    .expect("serialize index")
}

/// What a seeded multi-arch image consists of
pub struct SeededImage {
    pub config: Descriptor,
    pub layer: Descriptor,
    pub child: Descriptor,
    pub index: Descriptor,
}

/// Stores an index with one linux/amd64 child under `repository:tag`
pub fn seed_index(registry: &MemoryRegistry, repository: &str, tag: &str, salt: &str) -> SeededImage {
    let config = registry.put_blob(repository, format!("{{\"config\":\"{}\"}}", salt).as_bytes());
    let layer = registry.put_blob(repository, format!("layer-{}", salt).as_bytes());
    let child_payload = image_manifest(&config, std::slice::from_ref(&layer));
    let child = registry.put_manifest(repository, None, MEDIA_TYPE_DOCKER_MANIFEST, &child_payload);
    let index_payload = image_index(std::slice::from_ref(&child));
    let index = registry.put_manifest(repository, Some(tag), MEDIA_TYPE_OCI_INDEX, &index_payload);
    SeededImage {
        config,
        layer,
        child,
        index,
    }
}

/// Stores a single image whose second layer is a foreign layer
pub fn seed_with_foreign_layer(registry: &MemoryRegistry, repository: &str, tag: &str) -> (Descriptor, Descriptor) {
    let config = registry.put_blob(repository, b"{\"os\":\"windows\"}");
    let layer = registry.put_blob(repository, b"local layer");
    let foreign = Descriptor::new(
        MEDIA_TYPE_FOREIGN_LAYER,
        DigestUtils::compute_digest(b"served elsewhere"),
        16,
    );
    let payload = image_manifest(&config, &[layer.clone(), foreign.clone()]);
    registry.put_manifest(repository, Some(tag), MEDIA_TYPE_DOCKER_MANIFEST, &payload);
    (layer, foreign)
}
