//! Shared fixtures for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use warden_types::{PermissionEntry, User};

use crate::{
    ApiRequest, Backend, Credentials, LoginResponse, MemoryTokenStore, SessionConfig,
    SessionStore,
};

/// Builds a plain user with the given direct permission strings.
pub fn user(id: &str, permissions: &[&str]) -> User {
    User {
        id: id.to_owned(),
        username: format!("user{id}"),
        first_name: "Test".to_owned(),
        last_name: "User".to_owned(),
        email: format!("user{id}@example.com"),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        has_full_permission: false,
        role: None,
        is_active: Some(true),
    }
}

type Deferred = oneshot::Receiver<crate::Result<User>>;

/// A backend whose responses are controlled by the test.
///
/// Every registered username signs in with any password and receives the token returned by
/// [`ScriptedBackend::token_for`]. `whoami` answers from the registered users unless a response
/// was deferred with [`ScriptedBackend::defer_whoami`], in which case the call blocks until the
/// test resolves it.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    users: Mutex<HashMap<String, User>>,
    deferred: Mutex<VecDeque<Deferred>>,
    catalog: Mutex<Vec<PermissionEntry>>,
    sent: Mutex<Vec<(Method, String)>>,
    whoami_calls: AtomicUsize,
    permissions_calls: AtomicUsize,
    fail_whoami: AtomicBool,
}

impl ScriptedBackend {
    pub fn token_for(username: &str) -> String {
        format!("token-{username}")
    }

    /// Registers or replaces the user returned for `username`'s token.
    pub fn register(&self, username: &str, user: User) {
        self.users
            .lock()
            .unwrap()
            .insert(Self::token_for(username), user);
    }

    pub fn set_catalog(&self, entries: Vec<PermissionEntry>) {
        *self.catalog.lock().unwrap() = entries;
    }

    /// Queues a deferred response for the next `whoami` call.
    pub fn defer_whoami(&self) -> oneshot::Sender<crate::Result<User>> {
        let (tx, rx) = oneshot::channel();
        self.deferred.lock().unwrap().push_back(rx);
        tx
    }

    pub fn fail_whoami(&self, fail: bool) {
        self.fail_whoami.store(fail, Ordering::SeqCst);
    }

    pub fn whoami_calls(&self) -> usize {
        self.whoami_calls.load(Ordering::SeqCst)
    }

    pub fn permissions_calls(&self) -> usize {
        self.permissions_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(Method, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn login(&self, credentials: &Credentials) -> crate::Result<LoginResponse> {
        let token = Self::token_for(&credentials.username);
        let user = self.users.lock().unwrap().get(&token).cloned();
        match user {
            Some(user) if !credentials.password.expose_secret().is_empty() => {
                Ok(LoginResponse { token, user })
            }
            _ => Err(crate::Error::InvalidCredentials(
                "Invalid username or password".into(),
            )),
        }
    }

    async fn whoami(&self, token: &str) -> crate::Result<User> {
        self.whoami_calls.fetch_add(1, Ordering::SeqCst);

        let deferred = self.deferred.lock().unwrap().pop_front();
        if let Some(deferred) = deferred {
            return deferred.await.unwrap_or(Err(crate::Error::Unauthorized));
        }

        if self.fail_whoami.load(Ordering::SeqCst) {
            return Err(crate::Error::Status {
                status: 503,
                message: "Service Unavailable".into(),
            });
        }

        let user = self.users.lock().unwrap().get(token).cloned();
        user.ok_or(crate::Error::Unauthorized)
    }

    async fn permissions(&self, _token: Option<&str>) -> crate::Result<Vec<PermissionEntry>> {
        self.permissions_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.catalog.lock().unwrap().clone())
    }

    async fn send(&self, _token: Option<&str>, request: ApiRequest) -> crate::Result<Value> {
        self.sent
            .lock()
            .unwrap()
            .push((request.method.clone(), request.path.clone()));
        Ok(json!({ "ok": true, "path": request.path }))
    }
}

/// Creates a signed-out store over `backend` with an in-memory token store.
pub fn store(backend: &Arc<ScriptedBackend>, config: SessionConfig) -> SessionStore {
    SessionStore::new(
        backend.clone(),
        Arc::new(MemoryTokenStore::default()),
        config,
    )
}

/// Creates a store with `user` signed in as `jdoe`.
pub async fn signed_in(
    backend: &Arc<ScriptedBackend>,
    user: User,
    config: SessionConfig,
) -> SessionStore {
    backend.register("jdoe", user);
    let session = store(backend, config);
    session
        .login(&Credentials::new("jdoe", "secret"))
        .await
        .unwrap();
    session
}

/// Yields until the backend has seen at least `calls` `whoami` requests.
pub async fn wait_for_calls(backend: &ScriptedBackend, calls: usize) {
    while backend.whoami_calls() < calls {
        tokio::task::yield_now().await;
    }
}
