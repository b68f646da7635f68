use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use super::{ApiGuard, PermissionDenied};
use crate::{ApiRequest, SessionStore};

/// Result of [`GuardedClient::call`], shaped for direct consumption by UI code.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    /// `true` if the call was dispatched and succeeded.
    pub ok: bool,
    /// Response body of a successful call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message of a failed call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set if the API-call guard rejected the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied: Option<PermissionDenied>,
}

impl Outcome {
    fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            denied: None,
        }
    }

    fn failure(error: &crate::Error) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.to_string()),
            denied: None,
        }
    }

    fn denied(denied: PermissionDenied) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(denied.to_string()),
            denied: Some(denied),
        }
    }
}

/// An API client that checks every call against the session's ability before dispatching it.
#[derive(Debug, Clone)]
pub struct GuardedClient {
    session: SessionStore,
    guard: Arc<ApiGuard>,
}

impl GuardedClient {
    /// Creates a client dispatching through `session`'s backend.
    pub fn new(session: SessionStore, guard: ApiGuard) -> Self {
        Self {
            session,
            guard: Arc::new(guard),
        }
    }

    /// Returns the guard used to authorize calls.
    pub fn guard(&self) -> &ApiGuard {
        &self.guard
    }

    /// Authorizes and dispatches `request`.
    ///
    /// Returns [`Error::PermissionDenied`](crate::Error::PermissionDenied) without touching the
    /// network if the current ability does not authorize the call.
    pub async fn send(&self, request: ApiRequest) -> crate::Result<Value> {
        let ability = self.session.ability();
        self.guard
            .authorize(&request.method, &request.path, &ability)?;

        let token = self.session.token();
        self.session.backend().send(token.as_deref(), request).await
    }

    /// Like [`send`](Self::send), but folds every failure into the returned [`Outcome`].
    pub async fn call(&self, request: ApiRequest) -> Outcome {
        match self.send(request).await {
            Ok(data) => Outcome::success(data),
            Err(crate::Error::PermissionDenied(denied)) => Outcome::denied(denied),
            Err(err) => {
                tracing::debug!(error = &err as &dyn std::error::Error, "API call failed");
                Outcome::failure(&err)
            }
        }
    }

    /// Sends a `GET` request to `path`.
    pub async fn get(&self, path: &str) -> crate::Result<Value> {
        self.send(ApiRequest::new(Method::GET, path)).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::SessionConfig;
    use crate::testutil::{ScriptedBackend, signed_in, user};

    use super::*;

    async fn client(backend: &Arc<ScriptedBackend>, permissions: &[&str]) -> GuardedClient {
        let session = signed_in(backend, user("42", permissions), SessionConfig::default()).await;
        GuardedClient::new(session, ApiGuard::default())
    }

    #[tokio::test]
    async fn denied_calls_are_never_dispatched() {
        let backend = Arc::new(ScriptedBackend::default());
        let client = client(&backend, &["company-management:view"]).await;

        let request = ApiRequest::new(Method::POST, "/companies").json(json!({"name": "ACME"}));
        let err = client.send(request).await.unwrap_err();
        assert!(matches!(err, crate::Error::PermissionDenied(_)));
        assert!(backend.sent().is_empty());
    }

    #[tokio::test]
    async fn authorized_calls_are_dispatched() {
        let backend = Arc::new(ScriptedBackend::default());
        let client = client(&backend, &["company-management:view"]).await;

        let data = client
            .get("/companies/507f1f77bcf86cd799439011")
            .await
            .unwrap();
        assert_eq!(data["ok"], true);
        assert_eq!(
            backend.sent(),
            [(
                Method::GET,
                "/companies/507f1f77bcf86cd799439011".to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn call_folds_denials_into_outcome() {
        let backend = Arc::new(ScriptedBackend::default());
        let client = client(&backend, &[]).await;

        let outcome = client
            .call(ApiRequest::new(Method::DELETE, "/users/507f1f77bcf86cd799439011"))
            .await;
        assert!(!outcome.ok);
        assert!(outcome.data.is_none());

        let denied = outcome.denied.as_ref().unwrap();
        assert_eq!(denied.method, "DELETE");
        assert_eq!(
            denied.required.as_ref().map(ToString::to_string).as_deref(),
            Some("user-management:delete")
        );

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["denied"]["required"], "user-management:delete");
    }

    #[tokio::test]
    async fn call_reports_success() {
        let backend = Arc::new(ScriptedBackend::default());
        let client = client(&backend, &[]).await;

        let outcome = client.call(ApiRequest::new(Method::GET, "/auth/me")).await;
        assert!(outcome.ok);
        assert!(outcome.denied.is_none());
        assert_eq!(backend.sent().len(), 1);
    }
}
