use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use warden_types::{PermissionEntry, User};

const USER_AGENT: &str = concat!("warden-client/", env!("CARGO_PKG_VERSION"));

/// Path of the credential exchange endpoint.
pub const LOGIN_PATH: &str = "/auth/login";
/// Path of the "who am I" endpoint returning the canonical user record.
pub const WHOAMI_PATH: &str = "/auth/me";
/// Path of the permission catalog endpoint.
pub const PERMISSIONS_PATH: &str = "/permissions";

/// Username and password submitted to the login endpoint.
#[derive(Debug)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password; redacted in `Debug` output.
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// The login endpoint's response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginResponse {
    /// Opaque bearer token for subsequent requests.
    pub token: String,
    /// The full user record, including role and permissions.
    pub user: User,
}

/// An outbound call to the console API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API root, e.g. `/companies/507f1f77bcf86cd799439011`.
    pub path: String,
    /// Optional JSON body.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Creates a request without a body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    /// Attaches a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Transport to the console API.
///
/// The session store, the permission directory and the guarded client talk to the console only
/// through this trait, so tests can substitute scripted backends.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Exchanges credentials for a token and the user record.
    async fn login(&self, credentials: &Credentials) -> crate::Result<LoginResponse>;

    /// Fetches the canonical record of the user owning `token`.
    async fn whoami(&self, token: &str) -> crate::Result<User>;

    /// Fetches the permission catalog.
    async fn permissions(&self, token: Option<&str>) -> crate::Result<Vec<PermissionEntry>>;

    /// Dispatches an arbitrary API call.
    async fn send(&self, token: Option<&str>, request: ApiRequest) -> crate::Result<Value>;
}

#[derive(Debug)]
struct HttpBackendBuilderInner {
    api_url: Url,
    reqwest_builder: reqwest::ClientBuilder,
}

/// Builder to create a [`HttpBackend`].
#[must_use]
#[derive(Debug)]
pub struct HttpBackendBuilder(crate::Result<HttpBackendBuilderInner>);

impl HttpBackendBuilder {
    /// Creates a new builder for the console API rooted at `api_url`.
    pub fn new(api_url: impl reqwest::IntoUrl) -> Self {
        let mut api_url = match api_url.into_url() {
            Ok(url) => url,
            Err(err) => return Self(Err(err.into())),
        };

        if api_url.cannot_be_a_base() {
            return Self(Err(crate::Error::InvalidUrl {
                message: format!("`{api_url}` cannot be used as API root"),
            }));
        }

        // Url::join replaces the last segment unless the base ends with a slash
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        let reqwest_builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT);

        Self(Ok(HttpBackendBuilderInner {
            api_url,
            reqwest_builder,
        }))
    }

    /// Sets both the connect and the total request timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.configure_reqwest(|builder| builder.connect_timeout(timeout).timeout(timeout))
    }

    /// Calls the closure with the underlying [`reqwest::ClientBuilder`].
    pub fn configure_reqwest<F>(self, closure: F) -> Self
    where
        F: FnOnce(reqwest::ClientBuilder) -> reqwest::ClientBuilder,
    {
        let Ok(inner) = self.0 else { return self };
        Self(Ok(HttpBackendBuilderInner {
            api_url: inner.api_url,
            reqwest_builder: closure(inner.reqwest_builder),
        }))
    }

    /// Returns a [`HttpBackend`] that uses this configuration.
    ///
    /// # Errors
    ///
    /// This method fails if:
    /// - the given `api_url` is invalid
    /// - the [`reqwest::Client`] fails to build. Refer to [`reqwest::ClientBuilder::build`] for
    ///   more information on when this can happen.
    pub fn build(self) -> crate::Result<HttpBackend> {
        let inner = self.0?;
        Ok(HttpBackend {
            inner: Arc::new(HttpBackendInner {
                reqwest: inner.reqwest_builder.build()?,
                api_url: inner.api_url,
            }),
        })
    }
}

#[derive(Debug)]
struct HttpBackendInner {
    reqwest: reqwest::Client,
    api_url: Url,
}

/// A [`Backend`] speaking JSON over HTTP to the console API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    inner: Arc<HttpBackendInner>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpBackend {
    /// Convenience function to create a [`HttpBackendBuilder`].
    pub fn builder(api_url: impl reqwest::IntoUrl) -> HttpBackendBuilder {
        HttpBackendBuilder::new(api_url)
    }

    /// Returns the API root all request paths are resolved against.
    pub fn api_url(&self) -> &Url {
        &self.inner.api_url
    }

    fn url(&self, path: &str) -> crate::Result<Url> {
        self.inner
            .api_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| crate::Error::InvalidUrl {
                message: format!("invalid request path `{path}`: {err}"),
            })
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> crate::Result<reqwest::RequestBuilder> {
        let mut builder = self.inner.reqwest.request(method, self.url(path)?);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    /// Turns non-success responses into [`Error::Status`](crate::Error::Status), using the body's
    /// `message` field when there is one.
    async fn check(response: reqwest::Response) -> crate::Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_owned(),
        };

        Err(crate::Error::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn login(&self, credentials: &Credentials) -> crate::Result<LoginResponse> {
        let body = serde_json::json!({
            "username": credentials.username,
            "password": credentials.password.expose_secret(),
        });

        let response = self
            .request(Method::POST, LOGIN_PATH, None)?
            .json(&body)
            .send()
            .await?;

        match Self::check(response).await {
            Ok(response) => Ok(response.json().await?),
            Err(crate::Error::Status { status, message })
                if status == StatusCode::UNAUTHORIZED.as_u16()
                    || status == StatusCode::BAD_REQUEST.as_u16() =>
            {
                Err(crate::Error::InvalidCredentials(message))
            }
            Err(err) => Err(err),
        }
    }

    async fn whoami(&self, token: &str) -> crate::Result<User> {
        let response = self
            .request(Method::GET, WHOAMI_PATH, Some(token))?
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(crate::Error::Unauthorized);
        }

        Ok(Self::check(response).await?.json().await?)
    }

    async fn permissions(&self, token: Option<&str>) -> crate::Result<Vec<PermissionEntry>> {
        let response = self
            .request(Method::GET, PERMISSIONS_PATH, token)?
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn send(&self, token: Option<&str>, request: ApiRequest) -> crate::Result<Value> {
        let mut builder = self.request(request.method, &request.path, token)?;
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = Self::check(builder.send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_root_gets_trailing_slash() {
        let backend = HttpBackend::builder("http://localhost:3000/api")
            .build()
            .unwrap();
        assert_eq!(backend.api_url().as_str(), "http://localhost:3000/api/");
        assert_eq!(
            backend.url("/auth/me").unwrap().as_str(),
            "http://localhost:3000/api/auth/me"
        );
    }

    #[test]
    fn invalid_url_fails_on_build() {
        assert!(HttpBackend::builder("not a url").build().is_err());
        assert!(
            HttpBackend::builder("mailto:admin@example.com")
                .build()
                .is_err()
        );
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let credentials = Credentials::new("admin", "hunter2");
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
