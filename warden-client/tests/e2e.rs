use std::sync::Arc;

use reqwest::Method;
use serde_json::json;
use warden_client::guard::{ApiGuard, GuardedClient};
use warden_client::types::{PermissionEntry, User};
use warden_client::{
    ApiRequest, Credentials, Error, FileTokenStore, HttpBackend, MemoryTokenStore,
    PermissionDirectory, SessionConfig, SessionStore, TokenStore,
};
use warden_test::server::TestServer;

fn user(id: &str, permissions: &[&str]) -> User {
    serde_json::from_value(json!({
        "_id": id,
        "username": format!("user{id}"),
        "firstName": "Jane",
        "lastName": "Doe",
        "email": format!("user{id}@example.com"),
        "permissions": permissions,
        "isActive": true,
    }))
    .unwrap()
}

fn session(server: &TestServer, tokens: Arc<dyn TokenStore>) -> SessionStore {
    let backend = HttpBackend::builder(server.api_url()).build().unwrap();
    SessionStore::new(Arc::new(backend), tokens, SessionConfig::default())
}

#[tokio::test]
async fn signs_in_and_refreshes() {
    warden_test::tracing::init();
    let server = TestServer::new().await;
    let token = server.console().add_account(
        "jdoe",
        "hunter2",
        user("42", &["company-management:view"]),
    );

    let session = session(&server, Arc::new(MemoryTokenStore::default()));
    session
        .login(&Credentials::new("jdoe", "hunter2"))
        .await
        .unwrap();
    assert!(session.has_permission("company-management", "view"));
    assert_eq!(session.token().as_deref(), Some(token.as_str()));

    server
        .console()
        .set_user(&token, user("42", &["user-management:create"]));
    assert!(session.refresh_permissions().await);
    assert!(session.has_permission("user-management", "create"));
    assert!(!session.has_permission("company-management", "view"));
    assert_eq!(server.console().whoami_calls(), 1);
}

#[tokio::test]
async fn rejects_bad_credentials() {
    let server = TestServer::new().await;
    server.console().add_account("jdoe", "hunter2", user("42", &[]));

    let session = session(&server, Arc::new(MemoryTokenStore::default()));
    let err = session
        .login(&Credentials::new("jdoe", "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidCredentials(_)));
    assert!(!session.snapshot().is_authenticated());
}

#[tokio::test]
async fn failed_refresh_keeps_permissions() {
    let server = TestServer::new().await;
    server.console().add_account(
        "jdoe",
        "hunter2",
        user("42", &["company-management:view"]),
    );

    let session = session(&server, Arc::new(MemoryTokenStore::default()));
    session
        .login(&Credentials::new("jdoe", "hunter2"))
        .await
        .unwrap();
    let before = session.snapshot();

    server.console().fail_whoami(true);
    assert!(!session.refresh_permissions().await);
    assert_eq!(session.snapshot(), before);
    assert!(session.has_permission("company-management", "view"));
}

#[tokio::test]
async fn restores_session_from_token_file() {
    let server = TestServer::new().await;
    let token = server.console().add_account(
        "jdoe",
        "hunter2",
        user("42", &["permit-management:approve"]),
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session").join("token");

    let first = session(&server, Arc::new(FileTokenStore::open(&path).unwrap()));
    first
        .login(&Credentials::new("jdoe", "hunter2"))
        .await
        .unwrap();

    let second = session(&server, Arc::new(FileTokenStore::open(&path).unwrap()));
    assert!(second.bootstrap().await);
    assert!(second.has_permission("permit-management", "approve"));

    server.console().revoke(&token);
    let third = session(&server, Arc::new(FileTokenStore::open(&path).unwrap()));
    assert!(!third.bootstrap().await);
    assert!(!path.exists());
}

#[tokio::test]
async fn guarded_client_gates_calls() {
    let server = TestServer::new().await;
    server.console().add_account(
        "jdoe",
        "hunter2",
        user("42", &["company-management:view"]),
    );

    let session = session(&server, Arc::new(MemoryTokenStore::default()));
    session
        .login(&Credentials::new("jdoe", "hunter2"))
        .await
        .unwrap();
    let client = GuardedClient::new(session, ApiGuard::default());

    let data = client
        .get("/companies/507f1f77bcf86cd799439011?expand=true")
        .await
        .unwrap();
    assert_eq!(data["ok"], true);

    let outcome = client
        .call(ApiRequest::new(Method::POST, "/companies").json(json!({"name": "ACME"})))
        .await;
    assert!(!outcome.ok);
    assert!(outcome.denied.is_some());

    assert_eq!(
        server.console().requests(),
        [(
            "GET".to_owned(),
            "/companies/507f1f77bcf86cd799439011".to_owned()
        )]
    );
}

#[tokio::test]
async fn loads_permission_catalog_once() {
    let server = TestServer::new().await;
    server.console().set_catalog(vec![
        PermissionEntry {
            id: "user-management:view".into(),
            module: "Users".into(),
            name: "View users".into(),
        },
        PermissionEntry {
            id: "company-management:view".into(),
            module: "Companies".into(),
            name: "View companies".into(),
        },
    ]);

    let backend = HttpBackend::builder(server.api_url()).build().unwrap();
    let directory =
        PermissionDirectory::new(Arc::new(backend), Arc::new(MemoryTokenStore::default()));

    let grouped = directory.by_module().await.unwrap();
    assert_eq!(grouped.len(), 2);

    server.console().set_catalog(Vec::new());
    assert_eq!(directory.entries().await.unwrap().len(), 2);
}
