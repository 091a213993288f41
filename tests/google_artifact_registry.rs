use registry_replicator::adapter::{AdapterContext, builtin_registry};
use registry_replicator::config::ReplicationConfig;
use registry_replicator::model::{Credential, HealthStatus, Registry, RegistryType};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRIVATE_KEY: &str = include_str!("fixtures/service-account-key.pem");

fn service_account(token_uri: &str) -> String {
    serde_json::json!({
        "type": "service_account",
        "project_id": "test-project",
        "private_key_id": "key-id",
        "private_key": PRIVATE_KEY,
        "client_email": "replicator@test-project.iam.gserviceaccount.com",
        "token_uri": token_uri,
    })
    .to_string()
}

#[tokio::test]
async fn test_service_account_token_authorizes_registry_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "mock-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .and(header("authorization", "Bearer mock-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let adapters = builtin_registry(&AdapterContext::new(ReplicationConfig::default()).unwrap()).unwrap();
    let registry = Registry::new("gar", RegistryType::GOOGLE_GAR, server.uri()).with_credential(Credential::basic(
        "replicator",
        service_account(&format!("{}/token", server.uri())),
    ));
    let adapter = adapters.create_adapter(&registry).await.unwrap();
    assert_eq!(adapter.health_check().await.unwrap(), HealthStatus::Healthy);
    assert_eq!(adapter.health_check().await.unwrap(), HealthStatus::Healthy);
}

#[tokio::test]
async fn test_malformed_service_account_key_is_rejected() {
    let adapters = builtin_registry(&AdapterContext::new(ReplicationConfig::default()).unwrap()).unwrap();
    let registry = Registry::new("gar", RegistryType::GOOGLE_GAR, "https://us-central1-docker.pkg.dev")
        .with_credential(Credential::basic("replicator", r#"{"invalid": "json"}"#));
    assert!(adapters.create_adapter(&registry).await.is_err());
}
