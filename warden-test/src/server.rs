//! Exposes an in-process mock of the console API for use in integration tests.
//!
//! ```
//! use warden_test::server::{MockConsole, TestServer};
//!
//! #[tokio::main]
//! async fn main() {
//!    let console = MockConsole::default();
//!    let server = TestServer::with_console(console.clone()).await;
//!    let api_url = server.api_url();
//!    // point a client at the API root...
//! }
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use warden_types::{PermissionEntry, User};

/// Prefix all console endpoints are mounted under.
pub const API_PREFIX: &str = "/api";

#[derive(Debug, Default)]
struct ConsoleState {
    /// username to (password, token)
    accounts: HashMap<String, (String, String)>,
    /// token to user
    sessions: HashMap<String, User>,
    catalog: Vec<PermissionEntry>,
    requests: Vec<(String, String)>,
    whoami_calls: usize,
    fail_whoami: bool,
}

/// Scriptable state behind the mock console API.
///
/// Clones share the same state, so a test keeps one handle while the server serves another.
#[derive(Debug, Clone, Default)]
pub struct MockConsole {
    state: Arc<Mutex<ConsoleState>>,
}

impl MockConsole {
    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        // NB: Handlers never panic while holding the lock.
        self.state.lock().unwrap()
    }

    /// Registers an account and returns the token it signs in with.
    pub fn add_account(&self, username: &str, password: &str, user: User) -> String {
        let token = format!("token-{username}");
        let mut state = self.state();
        state
            .accounts
            .insert(username.to_owned(), (password.to_owned(), token.clone()));
        state.sessions.insert(token.clone(), user);
        token
    }

    /// Replaces the user record served for `token`.
    pub fn set_user(&self, token: &str, user: User) {
        self.state().sessions.insert(token.to_owned(), user);
    }

    /// Revokes `token`; subsequent "who am I" calls answer `401`.
    pub fn revoke(&self, token: &str) {
        self.state().sessions.remove(token);
    }

    /// Sets the permission catalog.
    pub fn set_catalog(&self, catalog: Vec<PermissionEntry>) {
        self.state().catalog = catalog;
    }

    /// Makes "who am I" answer `503` while `fail` is set.
    pub fn fail_whoami(&self, fail: bool) {
        self.state().fail_whoami = fail;
    }

    /// Returns the number of "who am I" calls served so far.
    pub fn whoami_calls(&self) -> usize {
        self.state().whoami_calls
    }

    /// Returns the method and path of every request that reached a generic resource endpoint.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state().requests.clone()
    }

    fn router(self) -> Router {
        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/me", get(me))
            .route("/permissions", get(permissions))
            .fallback(resource);

        Router::new().nest(API_PREFIX, api).with_state(self)
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn login(State(console): State<MockConsole>, Json(request): Json<LoginRequest>) -> Response {
    let state = console.state();
    let token = match state.accounts.get(&request.username) {
        Some((password, token)) if *password == request.password => token,
        _ => return error(StatusCode::UNAUTHORIZED, "Invalid username or password"),
    };

    match state.sessions.get(token) {
        Some(user) => Json(json!({ "token": token, "user": user })).into_response(),
        None => error(StatusCode::UNAUTHORIZED, "Account disabled"),
    }
}

async fn me(State(console): State<MockConsole>, headers: HeaderMap) -> Response {
    let mut state = console.state();
    state.whoami_calls += 1;

    if state.fail_whoami {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Console unavailable");
    }

    let user = bearer(&headers).and_then(|token| state.sessions.get(token));
    match user {
        Some(user) => Json(user).into_response(),
        None => error(StatusCode::UNAUTHORIZED, "Unauthorized"),
    }
}

async fn permissions(State(console): State<MockConsole>) -> Response {
    Json(console.state().catalog.clone()).into_response()
}

async fn resource(State(console): State<MockConsole>, method: Method, uri: Uri) -> Response {
    let path = uri.path().to_owned();
    console.state().requests.push((method.to_string(), path.clone()));
    Json(json!({ "ok": true, "method": method.as_str(), "path": path })).into_response()
}

/// An in-process mock console API for use in integration tests.
///
/// The server listens on a random available port on localhost and stops when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    console: MockConsole,
}

impl TestServer {
    /// Starts a server with an empty console.
    pub async fn new() -> Self {
        Self::with_console(MockConsole::default()).await
    }

    /// Starts a server serving `console`.
    pub async fn with_console(console: MockConsole) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let app = console.clone().router();
        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            console,
        }
    }

    /// Returns the console state served by this server.
    pub fn console(&self) -> &MockConsole {
        &self.console
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Returns the API root clients should be configured with.
    pub fn api_url(&self) -> String {
        self.url(&format!("{API_PREFIX}/"))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
