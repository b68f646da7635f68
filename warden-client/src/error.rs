use crate::guard::PermissionDenied;

/// Errors that can happen within the warden client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error emitted from the underlying [`reqwest`] client.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Error when URL manipulation fails.
    #[error("{message}")]
    InvalidUrl {
        /// The URL error message.
        message: String,
    },
    /// The console rejected the submitted credentials.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    /// The console rejected the session token.
    #[error("session token rejected")]
    Unauthorized,
    /// The console answered with an unexpected status code.
    #[error("console responded with {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, or the canonical reason.
        message: String,
    },
    /// The current ability does not authorize the outbound call.
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),
    /// IO errors while persisting the session token.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Errors decoding JSON payloads.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
