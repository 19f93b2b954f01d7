//! Integration tests for the HTTP provider and directory using wiremock.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use credential_reconciler::directory::{HttpUserDirectory, RoleWriter, UserDirectory};
use credential_reconciler::provider::{CredentialProvider, HttpCredentialProvider};
use credential_reconciler::types::IdentityFilter;
use credential_reconciler::{
    DirectoryError, ProviderError, ReconcileError, ReconcilePath, ReconcileState,
    ReconciliationEngine, Secret,
};

// =============================================================================
// Test Helpers
// =============================================================================

fn provider_for(server: &MockServer) -> HttpCredentialProvider {
    HttpCredentialProvider::new(&server.uri(), "emailpass", Duration::from_secs(2)).unwrap()
}

fn directory_for(server: &MockServer) -> HttpUserDirectory {
    HttpUserDirectory::new(&server.uri(), Duration::from_secs(2)).unwrap()
}

fn identity_json(id: &str, linked: Option<&str>) -> serde_json::Value {
    json!({
        "id": id,
        "provider": "emailpass",
        "entity_id": "a@test.com",
        "linked_user_id": linked,
    })
}

// =============================================================================
// Credential Provider
// =============================================================================

#[tokio::test]
async fn test_update_credential_puts_secret() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/providers/emailpass/identities/a%40test.com/secret"))
        .and(body_json(json!({ "secret": "pw" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    provider
        .update_credential("a@test.com", &Secret::new("pw"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_authenticate_unauthorized_is_not_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/providers/emailpass/authenticate"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let outcome = provider_for(&server)
        .authenticate("a@test.com", &Secret::new("pw"))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.identity.is_none());
}

#[tokio::test]
async fn test_register_conflict_is_refused_outcome() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/providers/emailpass/identities"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "message": "identity exists" })),
        )
        .mount(&server)
        .await;

    let outcome = provider_for(&server)
        .register_credential("a@test.com", &Secret::new("pw"))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("identity exists"));
}

#[tokio::test]
async fn test_list_identities_sends_filter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/identities"))
        .and(query_param("provider", "emailpass"))
        .and(query_param("entity_id", "a@test.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            identity_json("cred_1", Some("user_1")),
            identity_json("cred_2", None),
        ])))
        .mount(&server)
        .await;

    let identities = provider_for(&server)
        .list_identities(&IdentityFilter {
            provider: "emailpass".to_string(),
            entity_id: "a@test.com".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(identities.len(), 2);
    assert!(identities[0].is_linked_to("user_1"));
    assert!(identities[1].linked_user_id.is_none());
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/identities/delete"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = provider_for(&server)
        .delete_identities(&["cred_1".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Unavailable(ref m) if m.contains("maintenance")));
}

#[tokio::test]
async fn test_client_error_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/identities/cred_1/link"))
        .and(body_json(json!({ "linked_user_id": "user_1" })))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "forbidden" })))
        .mount(&server)
        .await;

    let err = provider_for(&server)
        .update_link("cred_1", "user_1")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Rejected(ref m) if m.contains("forbidden")));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    // Nothing listens on the discard port
    let provider =
        HttpCredentialProvider::new("http://127.0.0.1:9", "emailpass", Duration::from_secs(1))
            .unwrap();

    let err = provider
        .authenticate("a@test.com", &Secret::new("pw"))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

// =============================================================================
// User Directory
// =============================================================================

#[tokio::test]
async fn test_retrieve_user() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/user_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "user_1",
            "email": "A@Test.com",
            "role": "member",
        })))
        .mount(&server)
        .await;

    let user = directory_for(&server).retrieve_user("user_1").await.unwrap();
    assert_eq!(user.entity_id(), "a@test.com");
    assert_eq!(user.role.as_deref(), Some("member"));
    assert!(user.metadata.is_empty());
}

#[tokio::test]
async fn test_retrieve_missing_user() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = directory_for(&server)
        .retrieve_user("ghost")
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::NotFound(_)));
}

#[tokio::test]
async fn test_update_role_patches_user() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/users/user_1"))
        .and(body_json(json!({ "role": "admin" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "user_1",
            "email": "a@test.com",
            "role": "admin",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user = directory_for(&server)
        .update_role("user_1", "admin")
        .await
        .unwrap();
    assert_eq!(user.role.as_deref(), Some("admin"));
}

// =============================================================================
// Engine over HTTP
// =============================================================================

#[tokio::test]
async fn test_engine_happy_path_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/user_1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "user_1", "email": "A@Test.com" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/providers/emailpass/identities/a%40test.com/secret"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/providers/emailpass/authenticate"))
        .and(body_json(json!({ "entity_id": "a@test.com", "secret": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "identity": identity_json("cred_1", Some("user_1")),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/providers/emailpass/identities"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let engine = ReconciliationEngine::new(
        Arc::new(directory_for(&server)),
        Arc::new(provider_for(&server)),
    );
    let report = engine
        .reconcile_password_with_report("user_1", &Secret::new("pw"))
        .await
        .unwrap();

    assert_eq!(report.path, ReconcilePath::AlreadyConsistent);
    assert_eq!(report.identity.id, "cred_1");
}

#[tokio::test]
async fn test_engine_reports_provider_outage_during_verification() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/user_1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "user_1", "email": "a@test.com" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/providers/emailpass/identities/a%40test.com/secret"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/providers/emailpass/authenticate"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let engine = ReconciliationEngine::new(
        Arc::new(directory_for(&server)),
        Arc::new(provider_for(&server)),
    );
    let err = engine
        .reconcile_password("user_1", &Secret::new("pw"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::ProviderUnavailable {
            state: ReconcileState::VerifyInitial,
            ..
        }
    ));
}

#[tokio::test]
async fn test_engine_aborts_on_rate_limited_verification() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/user_1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "user_1", "email": "a@test.com" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/providers/emailpass/identities/a%40test.com/secret"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/providers/emailpass/authenticate"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/identities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/identities/delete"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let engine = ReconciliationEngine::new(
        Arc::new(directory_for(&server)),
        Arc::new(provider_for(&server)),
    );
    let err = engine
        .reconcile_password("user_1", &Secret::new("pw"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::ProviderRejected {
            state: ReconcileState::VerifyInitial,
            source: ProviderError::Rejected(_),
        }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_engine_separates_directory_refusal_from_outage() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/locked"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "forbidden" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let engine = ReconciliationEngine::new(
        Arc::new(directory_for(&server)),
        Arc::new(provider_for(&server)),
    );

    let refused = engine
        .reconcile_password("locked", &Secret::new("pw"))
        .await
        .unwrap_err();
    assert!(matches!(refused, ReconcileError::DirectoryRejected { .. }));
    assert_eq!(refused.code(), "directory_rejected");
    assert!(!refused.is_retryable());

    let outage = engine
        .reconcile_password("busy", &Secret::new("pw"))
        .await
        .unwrap_err();
    assert!(matches!(outage, ReconcileError::DirectoryUnavailable { .. }));
    assert!(outage.is_retryable());
}
