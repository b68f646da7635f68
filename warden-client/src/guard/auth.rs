use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::Snapshot;

/// Default location of the sign-in page.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Characters left unescaped in the `redirect` query value, matching URI component encoding.
const REDIRECT_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Outcome of the authentication guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// The session is still loading; render a placeholder.
    Pending,
    /// Send the user to the sign-in page.
    Redirect {
        /// Sign-in location including the originally requested destination.
        location: String,
    },
    /// Render the protected content.
    Allow,
}

/// Decides whether `requested` may be rendered for the session in `snapshot`.
///
/// Users without a session and users explicitly marked inactive are redirected to `login_path`.
/// The redirect preserves `requested` in a `redirect` query parameter for post-login return.
pub fn authenticate(snapshot: &Snapshot, requested: &str, login_path: &str) -> AuthDecision {
    if snapshot.is_loading() {
        return AuthDecision::Pending;
    }

    match snapshot.user() {
        Some(user) if user.is_active() => AuthDecision::Allow,
        Some(user) => {
            tracing::debug!(user = %user.id, "user is deactivated, redirecting to sign-in");
            AuthDecision::Redirect {
                location: login_redirect(login_path, requested),
            }
        }
        None => AuthDecision::Redirect {
            location: login_redirect(login_path, requested),
        },
    }
}

/// Builds the sign-in location returning to `requested` afterwards.
pub fn login_redirect(login_path: &str, requested: &str) -> String {
    if requested.is_empty() || requested == login_path {
        return login_path.to_owned();
    }

    let separator = if login_path.contains('?') { '&' } else { '?' };
    format!(
        "{login_path}{separator}redirect={}",
        utf8_percent_encode(requested, REDIRECT_VALUE)
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::SessionConfig;
    use crate::testutil::{ScriptedBackend, store, user};

    use super::*;

    #[test]
    fn pending_while_loading() {
        let backend = Arc::new(ScriptedBackend::default());
        let snapshot = store(&backend, SessionConfig::default()).snapshot();

        assert_eq!(
            authenticate(&snapshot, "/companies", DEFAULT_LOGIN_PATH),
            AuthDecision::Pending
        );
    }

    #[test]
    fn redirects_without_user() {
        let snapshot = Snapshot::for_tests(None, 0);
        assert_eq!(
            authenticate(&snapshot, "/companies?page=2", DEFAULT_LOGIN_PATH),
            AuthDecision::Redirect {
                location: "/login?redirect=%2Fcompanies%3Fpage%3D2".into()
            }
        );
    }

    #[test]
    fn redirects_deactivated_user() {
        let mut inactive = user("42", &["company-management:view"]);
        inactive.is_active = Some(false);
        let snapshot = Snapshot::for_tests(Some(inactive), 1);

        assert!(matches!(
            authenticate(&snapshot, "/companies", DEFAULT_LOGIN_PATH),
            AuthDecision::Redirect { .. }
        ));
    }

    #[test]
    fn allows_active_user_and_unknown_activity() {
        let snapshot = Snapshot::for_tests(Some(user("42", &[])), 1);
        assert_eq!(
            authenticate(&snapshot, "/", DEFAULT_LOGIN_PATH),
            AuthDecision::Allow
        );

        let mut unknown = user("42", &[]);
        unknown.is_active = None;
        let snapshot = Snapshot::for_tests(Some(unknown), 1);
        assert_eq!(
            authenticate(&snapshot, "/", DEFAULT_LOGIN_PATH),
            AuthDecision::Allow
        );
    }

    #[test]
    fn redirect_omits_empty_and_login_destinations() {
        assert_eq!(login_redirect("/login", ""), "/login");
        assert_eq!(login_redirect("/login", "/login"), "/login");
        assert_eq!(
            login_redirect("/auth?next=1", "/users"),
            "/auth?next=1&redirect=%2Fusers"
        );
    }
}
