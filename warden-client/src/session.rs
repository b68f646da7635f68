use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use warden_types::{User, UserPatch};

use crate::{Ability, AbilityCache, Backend, Credentials, TokenStore};

/// Number of notices buffered for slow subscribers before they start lagging.
const NOTICE_CAPACITY: usize = 32;

/// Session behaviour settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Discard refresh responses that resolve after a response to a later-issued refresh.
    ///
    /// By default the last response to resolve wins, even if its request was issued earlier.
    /// With this enabled every refresh is stamped with a sequence number and responses older
    /// than the newest applied one are dropped.
    pub discard_stale_refreshes: bool,
}

/// A transient, user-facing message emitted by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The server pushed a permission change for the signed-in user.
    PermissionsUpdated {
        /// Message sent along with the event.
        message: String,
    },
    /// The signed-in user's role was deactivated or removed.
    RoleRemoved {
        /// Display name of the removed role.
        role_name: String,
        /// Message sent along with the event.
        message: String,
    },
    /// A refresh failed; the previous permissions stay in effect.
    RefreshFailed {
        /// Description of the failure.
        reason: String,
    },
    /// The session was signed out.
    SignedOut,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PermissionsUpdated { message } if !message.is_empty() => f.write_str(message),
            Notice::PermissionsUpdated { .. } => f.write_str("Your permissions have been updated."),
            Notice::RoleRemoved { role_name, message } if message.is_empty() => {
                write!(f, "Your role \"{role_name}\" has been removed or deactivated.")
            }
            Notice::RoleRemoved { role_name, message } => {
                write!(f, "Your role \"{role_name}\" has been removed: {message}")
            }
            Notice::RefreshFailed { reason } => {
                write!(f, "Could not refresh permissions: {reason}")
            }
            Notice::SignedOut => f.write_str("You have been signed out."),
        }
    }
}

/// The session's current state.
///
/// Snapshots are replaced as a whole. A reader always sees either the previous consistent user
/// record or the new one, never a partially written record.
#[derive(Debug, Clone)]
pub struct Snapshot {
    user: Option<Arc<User>>,
    loading: bool,
    version: u64,
    grants_version: u64,
    epoch: u64,
    applied_refresh: u64,
}

impl Snapshot {
    fn initial() -> Self {
        Self {
            user: None,
            loading: true,
            version: 0,
            grants_version: 0,
            epoch: 0,
            applied_refresh: 0,
        }
    }

    /// Returns the signed-in user.
    pub fn user(&self) -> Option<&User> {
        self.user.as_deref()
    }

    /// Returns the id of the signed-in user.
    pub fn user_id(&self) -> Option<&str> {
        self.user().map(|user| user.id.as_str())
    }

    /// Returns `true` until the session has been restored or a sign-in attempt has finished.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Returns `true` if a user is signed in.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Monotonic counter bumped on every change of this snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Monotonic counter bumped whenever the authorization-relevant part of the user changes.
    ///
    /// Consumers holding a derived [`Ability`] compare this against the version they built from
    /// to decide whether to rebuild.
    pub fn grants_version(&self) -> u64 {
        self.grants_version
    }

    fn set_user(&mut self, user: Option<Arc<User>>) {
        if !same_grants(self.user(), user.as_deref()) {
            self.grants_version += 1;
        }
        self.user = user;
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    #[cfg(test)]
    pub(crate) fn for_tests(user: Option<User>, grants_version: u64) -> Self {
        Self {
            user: user.map(Arc::new),
            loading: false,
            grants_version,
            ..Self::initial()
        }
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user
            && self.loading == other.loading
            && self.version == other.version
            && self.grants_version == other.grants_version
    }
}

fn same_grants(a: Option<&User>, b: Option<&User>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.id == b.id
                && a.permissions == b.permissions
                && a.has_full_permission == b.has_full_permission
                && a.role == b.role
        }
        _ => false,
    }
}

#[derive(Debug)]
struct SessionInner {
    backend: Arc<dyn Backend>,
    tokens: Arc<dyn TokenStore>,
    config: SessionConfig,
    state: watch::Sender<Snapshot>,
    notices: broadcast::Sender<Notice>,
    refresh_seq: AtomicU64,
    ability: Mutex<AbilityCache>,
}

/// The single owner of the signed-in user record.
///
/// Every other component reads the session through [`snapshot`](Self::snapshot) or
/// [`subscribe`](Self::subscribe); only the store's own operations write it. Cloning the store
/// is cheap and yields a handle to the same session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl SessionStore {
    /// Creates a store in the loading state.
    ///
    /// Call [`bootstrap`](Self::bootstrap) to restore a persisted session or
    /// [`login`](Self::login) to start a new one.
    pub fn new(
        backend: Arc<dyn Backend>,
        tokens: Arc<dyn TokenStore>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(Snapshot::initial());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                backend,
                tokens,
                config,
                state,
                notices,
                refresh_seq: AtomicU64::new(0),
                ability: Mutex::new(AbilityCache::new()),
            }),
        }
    }

    /// Returns a copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.borrow().clone()
    }

    /// Subscribes to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.state.subscribe()
    }

    /// Subscribes to user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Returns the backend this session talks to.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Returns the persisted session token.
    pub fn token(&self) -> Option<String> {
        self.inner.tokens.load()
    }

    /// Returns the ability derived from the current snapshot.
    pub fn ability(&self) -> Arc<Ability> {
        let snapshot = self.snapshot();
        // NB: The cache is only locked for the duration of a rebuild, a panic in there is a bug.
        self.inner.ability.lock().unwrap().get(&snapshot)
    }

    /// Returns whether the signed-in user may perform `action` on `subject`.
    ///
    /// This never touches the network.
    pub fn has_permission(&self, subject: &str, action: &str) -> bool {
        self.ability().can(action, subject)
    }

    pub(crate) fn notify(&self, notice: Notice) {
        // Sending only fails without subscribers, in which case nobody is listening anyway.
        self.inner.notices.send(notice).ok();
    }

    /// Restores a session from the persisted token.
    ///
    /// Returns `true` if a user was restored. Without a token, or if the console rejects it, the
    /// session ends up signed out. A rejected token is removed; on other failures the token is
    /// kept so a later refresh can still pick the session up.
    pub async fn bootstrap(&self) -> bool {
        let Some(token) = self.inner.tokens.load() else {
            tracing::debug!("no persisted session token");
            self.finish_loading();
            return false;
        };

        let epoch = self.inner.state.borrow().epoch;
        match self.inner.backend.whoami(&token).await {
            Ok(user) => {
                let user_id = user.id.clone();
                let restored = self.inner.state.send_if_modified(|s| {
                    if s.epoch != epoch {
                        return false;
                    }
                    s.set_user(Some(Arc::new(user)));
                    s.loading = false;
                    s.touch();
                    true
                });
                if restored {
                    tracing::info!(user = %user_id, "session restored");
                }
                restored
            }
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "failed to restore session"
                );
                if matches!(err, crate::Error::Unauthorized) {
                    self.clear_token();
                }
                self.finish_loading();
                false
            }
        }
    }

    /// Exchanges `credentials` for a session.
    ///
    /// On success the full user record returned by the console becomes the session's user and
    /// the token is persisted. On failure the session's user is left as it was and the error is
    /// returned to the caller.
    pub async fn login(&self, credentials: &Credentials) -> crate::Result<Arc<User>> {
        let response = match self.inner.backend.login(credentials).await {
            Ok(response) => response,
            Err(err) => {
                tracing::info!(
                    username = %credentials.username,
                    error = &err as &dyn std::error::Error,
                    "sign-in failed"
                );
                self.finish_loading();
                return Err(err);
            }
        };

        if let Err(err) = self.inner.tokens.save(&response.token) {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "failed to persist session token"
            );
        }

        let user = Arc::new(response.user);
        self.inner.state.send_modify(|s| {
            s.epoch += 1;
            s.set_user(Some(Arc::clone(&user)));
            s.loading = false;
            s.touch();
        });

        tracing::info!(user = %user.id, "signed in");
        Ok(user)
    }

    /// Signs out, clearing the snapshot and the persisted token.
    ///
    /// Calling this without a session is a no-op. Refreshes still in flight when this is called
    /// never write their result into the snapshot.
    pub fn logout(&self) {
        self.clear_token();

        let mut signed_out = false;
        self.inner.state.send_if_modified(|s| {
            s.epoch += 1;
            if s.user.is_none() && !s.loading {
                return false;
            }
            signed_out = s.user.is_some();
            s.set_user(None);
            s.loading = false;
            s.touch();
            true
        });

        if signed_out {
            tracing::info!("signed out");
            self.notify(Notice::SignedOut);
        }
    }

    /// Re-fetches the canonical user record and replaces the session's user with it.
    ///
    /// Returns `false` if the refresh failed. The previous snapshot is then left untouched, so
    /// `false` means "the prior permissions are still in effect", never "permissions revoked".
    ///
    /// Concurrent refreshes are harmless: each one is a fetch followed by a single atomic
    /// replace, and the response that resolves last wins unless
    /// [`SessionConfig::discard_stale_refreshes`] is set.
    pub async fn refresh_permissions(&self) -> bool {
        let Some(token) = self.inner.tokens.load() else {
            tracing::debug!("skipping permission refresh without a session token");
            return false;
        };

        let epoch = self.inner.state.borrow().epoch;
        let seq = self.inner.refresh_seq.fetch_add(1, Ordering::Relaxed) + 1;

        let user = match self.inner.backend.whoami(&token).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "failed to refresh permissions"
                );
                self.notify(Notice::RefreshFailed {
                    reason: err.to_string(),
                });
                return false;
            }
        };

        let discard_stale = self.inner.config.discard_stale_refreshes;
        let mut outcome = Applied::Replaced;
        self.inner.state.send_if_modified(|s| {
            if s.epoch != epoch {
                outcome = Applied::SessionChanged;
                return false;
            }
            if discard_stale && seq < s.applied_refresh {
                outcome = Applied::Stale;
                return false;
            }

            s.applied_refresh = s.applied_refresh.max(seq);
            if !s.loading && s.user.as_deref() == Some(&user) {
                outcome = Applied::Unchanged;
                return false;
            }

            s.set_user(Some(Arc::new(user)));
            s.loading = false;
            s.touch();
            true
        });

        match outcome {
            Applied::Replaced => {
                tracing::debug!(seq, "permissions refreshed");
                true
            }
            Applied::Unchanged => true,
            Applied::Stale => {
                tracing::debug!(seq, "discarding stale refresh response");
                true
            }
            Applied::SessionChanged => {
                tracing::debug!(seq, "session changed while refreshing, dropping response");
                false
            }
        }
    }

    /// Merges a partial user record into the session, e.g. after a profile edit.
    ///
    /// The derived ability is only rebuilt if the patch changes authorization-relevant fields.
    /// Returns `false` if there is no signed-in user.
    pub fn update_user_data(&self, patch: UserPatch) -> bool {
        self.inner.state.send_if_modified(|s| {
            let Some(current) = &s.user else {
                return false;
            };

            let mut user = User::clone(current);
            user.apply(patch);
            s.set_user(Some(Arc::new(user)));
            s.touch();
            true
        })
    }

    fn finish_loading(&self) {
        self.inner.state.send_if_modified(|s| {
            if !s.loading {
                return false;
            }
            s.loading = false;
            s.touch();
            true
        });
    }

    fn clear_token(&self) {
        if let Err(err) = self.inner.tokens.clear() {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "failed to remove session token"
            );
        }
    }
}

enum Applied {
    Replaced,
    Unchanged,
    Stale,
    SessionChanged,
}
