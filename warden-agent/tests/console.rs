use secrecy::SecretBox;
use serde_json::json;
use warden_agent::config::{Config, ConfigSecret, Credentials};
use warden_agent::console::Console;
use warden_client::guard::{AuthDecision, CapabilityDecision, Requirement, RouteMeta};
use warden_types::{NavEntry, PermissionEntry, User};
use warden_test::server::TestServer;

fn user(id: &str, permissions: &[&str]) -> User {
    serde_json::from_value(json!({
        "_id": id,
        "username": "agent",
        "permissions": permissions,
        "role": {
            "_id": "7",
            "name": "Auditor",
            "permissions": { "history": { "view": true, "delete": false } },
        },
    }))
    .unwrap()
}

fn config(server: &TestServer) -> Config {
    Config {
        api_url: server.api_url(),
        credentials: Some(Credentials {
            username: "agent".into(),
            password: SecretBox::new(Box::new(ConfigSecret::from("hunter2"))),
        }),
        navigation: vec![
            NavEntry::new("Dashboard", "/", "home"),
            NavEntry::new("Users", "/users", "people").requires("view", "user-management"),
            NavEntry::new("History", "/history", "clock").requires("view", "history"),
        ],
        ..Default::default()
    }
}

#[tokio::test]
async fn connects_with_credentials() {
    warden_test::tracing::init();
    let server = TestServer::new().await;
    server
        .console()
        .add_account("agent", "hunter2", user("42", &["company-management:view"]));

    let console = Console::connect(&config(&server)).await.unwrap();

    assert!(console.check("view", "company-management"));
    assert!(console.check("view", "history"));
    assert!(!console.check("delete", "history"));

    let pages: Vec<_> = console.pages().iter().map(|e| e.title.as_str()).collect();
    assert_eq!(pages, ["Dashboard", "History"]);
}

#[tokio::test]
async fn fails_without_credentials() {
    let server = TestServer::new().await;
    let config = Config {
        credentials: None,
        ..config(&server)
    };

    assert!(Console::connect(&config).await.is_err());
}

#[tokio::test]
async fn evaluates_routes_and_pages() {
    let server = TestServer::new().await;
    server
        .console()
        .add_account("agent", "hunter2", user("42", &["company-management:view"]));
    let console = Console::connect(&config(&server)).await.unwrap();

    let (requirement, denied) = console
        .route("get", "/companies/507f1f77bcf86cd799439011")
        .unwrap();
    assert_eq!(
        requirement,
        Requirement::Grant("company-management:view".parse().unwrap())
    );
    assert!(denied.is_none());

    let (_, denied) = console.route("DELETE", "/companies").unwrap();
    assert!(denied.is_some());
    assert!(console.route("not a method", "/companies").is_err());

    let route = RouteMeta::new("/users").requires("view", "user-management");
    let (auth, capability) = console.page(&route);
    assert_eq!(auth, AuthDecision::Allow);
    assert!(matches!(capability, CapabilityDecision::SoftDenied(_)));
}

#[tokio::test]
async fn lists_permission_catalog() {
    let server = TestServer::new().await;
    server
        .console()
        .add_account("agent", "hunter2", user("42", &[]));
    server.console().set_catalog(vec![PermissionEntry {
        id: "history:view".into(),
        module: "History".into(),
        name: "View history".into(),
    }]);

    let console = Console::connect(&config(&server)).await.unwrap();
    let grouped = console.permissions().await.unwrap();
    assert_eq!(grouped["History"][0].id, "history:view");
}

#[tokio::test]
async fn restores_persisted_session() {
    let server = TestServer::new().await;
    server
        .console()
        .add_account("agent", "hunter2", user("42", &[]));

    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&server);
    config.session.token_file = Some(dir.path().join("token"));

    Console::connect(&config).await.unwrap();

    config.credentials = None;
    let console = Console::connect(&config).await.unwrap();
    assert!(console.session().snapshot().is_authenticated());
}
