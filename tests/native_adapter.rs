use registry_replicator::adapter::{AdapterContext, AdapterRegistry, NativeAdapter, native};
use registry_replicator::config::ReplicationConfig;
use registry_replicator::http::HttpClient;
use registry_replicator::model::{Filter, Registry, RegistryType};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_tags(server: &MockServer, repository: &str, tags: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/tags/list", repository)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": repository,
            "tags": tags,
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_filters_catalog_and_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .and(query_param("last", "library/hello-world"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"repositories": ["other/x"]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", "</v2/_catalog?n=1000&last=library/hello-world>; rel=\"next\"")
                .set_body_json(serde_json::json!({"repositories": ["library/hello-world"]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_tags(&server, "library/hello-world", &["1.0", "2.0"]).await;
    Mock::given(method("GET"))
        .and(path("/v2/other/x/tags/list"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let registry = Registry::new("upstream", RegistryType::DOCKER_REGISTRY, server.uri());
    let adapter = NativeAdapter::with_http(&registry, HttpClient::new(reqwest::Client::new())).unwrap();
    let resources = adapter
        .fetch_artifacts(&[Filter::name("library/*"), Filter::tag("1.*")])
        .await
        .unwrap();

    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].repository(), "library/hello-world");
    assert_eq!(resources[0].metadata.references(), vec!["1.0"]);
    assert_eq!(resources[0].registry.url, server.uri());
}

#[tokio::test]
async fn test_excluding_tag_filter() {
    let server = MockServer::start().await;
    mount_tags(&server, "library/redis", &["7.0", "7.0-alpine", "6.2"]).await;

    let registry = Registry::new("upstream", RegistryType::DOCKER_REGISTRY, server.uri());
    let adapter = NativeAdapter::with_http(&registry, HttpClient::new(reqwest::Client::new())).unwrap();
    let resources = adapter
        .fetch_artifacts(&[Filter::name("library/redis"), Filter::tag("*-alpine").excluding()])
        .await
        .unwrap();

    assert_eq!(resources.len(), 1);
    let mut tags = resources[0].metadata.references();
    tags.sort();
    assert_eq!(tags, vec!["6.2", "7.0"]);
}

#[tokio::test]
async fn test_anonymous_registry_through_factory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_tags(&server, "library/alpine", &["3.19"]).await;

    let ctx = AdapterContext::new(ReplicationConfig::default()).unwrap();
    let adapters = AdapterRegistry::new();
    native::register(&adapters, &ctx).unwrap();
    let registry = Registry::new("upstream", RegistryType::DOCKER_REGISTRY, server.uri());
    let adapter = adapters.create_adapter(&registry).await.unwrap();
    let artifacts = adapter.as_artifact_registry().unwrap();

    let tags = artifacts.list_tags("library/alpine").await.unwrap();
    assert_eq!(tags, vec!["3.19"]);
}
