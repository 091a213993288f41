use registry_replicator::adapter::{AdapterContext, AdapterRegistry, ArtifactRegistry, native};
use registry_replicator::config::ReplicationConfig;
use registry_replicator::model::{Credential, Registry, RegistryType};
use registry_replicator::{ReplicationError, Result};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIGEST: &str = "sha256:6c3c624b58dbbcd3c0dd82b4c53f04194d1247c6eebdaab7c610cf7d66709b3b";

async fn token_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!(r#"Bearer realm="{}/token",service="registry.docker.io""#, server.uri()).as_str(),
        ))
        .expect(1)
        .mount(&server)
        .await;
    server
}

async fn artifact_registry(server: &MockServer) -> Result<Arc<dyn ArtifactRegistry>> {
    let ctx = AdapterContext::new(ReplicationConfig::default())?;
    let adapters = AdapterRegistry::new();
    native::register(&adapters, &ctx)?;
    let registry = Registry::new("upstream", RegistryType::DOCKER_REGISTRY, server.uri())
        .with_credential(Credential::basic("robot", "s3cret"));
    adapters
        .create_adapter(&registry)
        .await?
        .as_artifact_registry()
        .ok_or_else(|| ReplicationError::Fatal("not an artifact registry".into()))
}

#[tokio::test]
async fn test_pull_scope_token_is_reused() {
    let server = token_server().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "registry.docker.io"))
        .and(query_param("scope", "repository:library/hello-world:pull"))
        .and(header("authorization", "Basic cm9ib3Q6czNjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "pull-token",
            "expires_in": 300,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/v2/library/hello-world/manifests/latest"))
        .and(header("authorization", "Bearer pull-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", DIGEST)
                .insert_header("Content-Type", "application/vnd.oci.image.index.v1+json"),
        )
        .expect(2)
        .mount(&server)
        .await;

    let registry = artifact_registry(&server).await.unwrap();
    for _ in 0..2 {
        let descriptor = registry
            .manifest_exist("library/hello-world", "latest")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(descriptor.digest, DIGEST);
    }
}

#[tokio::test]
async fn test_mount_requests_both_scopes() {
    let server = token_server().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("scope", "repository:library/alpine:pull"))
        .and(query_param("scope", "repository:library/hello-world:pull,push"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "push-token"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/library/hello-world/blobs/uploads/"))
        .and(query_param("from", "library/alpine"))
        .and(header("authorization", "Bearer push-token"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let registry = artifact_registry(&server).await.unwrap();
    assert!(registry
        .mount_blob("library/alpine", DIGEST, "library/hello-world")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_token_denial_surfaces_as_forbidden() {
    let server = token_server().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(403).set_body_string("insufficient_scope"))
        .mount(&server)
        .await;

    let registry = artifact_registry(&server).await.unwrap();
    let err = registry
        .manifest_exist("library/hello-world", "latest")
        .await
        .unwrap_err();
    assert!(matches!(err, ReplicationError::Forbidden(_)));
}
