//! The agent's connection to the console.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use secrecy::ExposeSecret;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use warden_client::guard::{
    ApiGuard, AuthDecision, CapabilityDecision, CapabilityGuard, PermissionDenied, Requirement,
    RouteMeta, accessible_pages, authenticate,
};
use warden_client::triggers::{ManualRefresh, RefreshOutcome, RefreshTriggers};
use warden_client::{
    Credentials, FileTokenStore, HttpBackend, MemoryTokenStore, Method, PermissionDirectory,
    SessionStore, TokenStore,
};
use warden_types::{NavEntry, PermissionEntry};

use crate::config::Config;

/// A signed-in session together with the guards evaluated against it.
#[derive(Debug)]
pub struct Console {
    session: SessionStore,
    directory: PermissionDirectory,
    api_guard: ApiGuard,
    capability_guard: CapabilityGuard,
    navigation: Vec<NavEntry>,
    login_path: String,
}

impl Console {
    /// Creates a signed-out console from `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let backend = HttpBackend::builder(config.api_url.as_str())
            .timeout(config.timeout)
            .build()
            .context("failed to create console API client")?;
        let backend = Arc::new(backend);

        let tokens: Arc<dyn TokenStore> = match &config.session.token_file {
            Some(path) => Arc::new(
                FileTokenStore::open(path)
                    .with_context(|| format!("failed to open token file {}", path.display()))?,
            ),
            None => Arc::new(MemoryTokenStore::default()),
        };

        let session = SessionStore::new(
            backend.clone(),
            tokens.clone(),
            config.session.store_config(),
        );

        Ok(Self {
            session,
            directory: PermissionDirectory::new(backend, tokens),
            api_guard: ApiGuard::default(),
            capability_guard: CapabilityGuard::new(config.guards.enforce),
            navigation: config.navigation.clone(),
            login_path: config.guards.login_path.clone(),
        })
    }

    /// Creates a console and signs in.
    ///
    /// A persisted session is restored if possible. Otherwise the configured credentials are
    /// used.
    pub async fn connect(config: &Config) -> Result<Self> {
        let console = Self::new(config)?;
        if console.session.bootstrap().await {
            return Ok(console);
        }

        let Some(credentials) = &config.credentials else {
            bail!("no persisted session and no credentials configured");
        };

        let credentials = Credentials::new(
            credentials.username.as_str(),
            credentials.password.expose_secret().as_str(),
        );
        console
            .session
            .login(&credentials)
            .await
            .context("failed to sign in")?;

        Ok(console)
    }

    /// Returns the session.
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Returns whether the signed-in user may perform `action` on `subject`.
    pub fn check(&self, action: &str, subject: &str) -> bool {
        self.session.has_permission(subject, action)
    }

    /// Evaluates the authentication and capability guards for rendering `route`.
    pub fn page(&self, route: &RouteMeta) -> (AuthDecision, CapabilityDecision) {
        let snapshot = self.session.snapshot();
        let auth = authenticate(&snapshot, &route.path, &self.login_path);
        let capability = self.capability_guard.check(route, &snapshot);
        (auth, capability)
    }

    /// Returns what calling `method` on `path` requires, and the denial if the session may not.
    pub fn route(
        &self,
        method: &str,
        path: &str,
    ) -> Result<(Requirement, Option<PermissionDenied>)> {
        let method: Method = method
            .to_ascii_uppercase()
            .parse()
            .with_context(|| format!("invalid HTTP method `{method}`"))?;

        let ability = self.session.ability();
        let requirement = self.api_guard.required(&method, path);
        let denied = self.api_guard.authorize(&method, path, &ability).err();
        Ok((requirement, denied))
    }

    /// Returns the navigation entries the signed-in user may see.
    pub fn pages(&self) -> Vec<&NavEntry> {
        accessible_pages(&self.navigation, &self.session.ability())
    }

    /// Returns the permission catalog grouped by module.
    pub async fn permissions(&self) -> Result<BTreeMap<String, Vec<PermissionEntry>>> {
        self.directory
            .by_module()
            .await
            .context("failed to load permission catalog")
    }
}

/// Signs in and keeps the session's permissions current until shut down.
///
/// `SIGUSR1` triggers a manual refresh.
pub async fn run(config: Config) -> Result<()> {
    let console = Console::connect(&config).await?;
    if let Some(user) = console.session.snapshot().user() {
        tracing::info!(user = %user.id, name = %user.display_name(), "session ready");
    }

    // The agent has no push transport, so the push trigger is never started.
    let triggers = RefreshTriggers::start(console.session(), &config.triggers, None);
    tracing::info!(triggers = ?triggers.running(), "refresh triggers started");

    tokio::spawn(log_notices(console.session.notices()));
    tokio::spawn(refresh_on_signal(triggers.manual().clone()));

    elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .await;

    triggers.stop().await;
    tracing::info!("shutting down");

    Ok(())
}

async fn log_notices(mut notices: broadcast::Receiver<warden_client::Notice>) {
    let guard = elegant_departure::get_shutdown_guard();
    loop {
        let notice = tokio::select! {
            _ = guard.wait() => return,
            notice = notices.recv() => notice,
        };

        match notice {
            Ok(notice) => tracing::info!(%notice, "session notice"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "dropped session notices");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn refresh_on_signal(manual: ManualRefresh) {
    let guard = elegant_departure::get_shutdown_guard();
    let mut signals = match signal(SignalKind::user_defined1()) {
        Ok(signals) => signals,
        Err(err) => {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "failed to install SIGUSR1 handler"
            );
            return;
        }
    };

    loop {
        tokio::select! {
            _ = guard.wait() => return,
            received = signals.recv() => {
                if received.is_none() {
                    return;
                }
            }
        }

        match manual.refresh().await {
            RefreshOutcome::Refreshed => tracing::info!("permissions refreshed on request"),
            RefreshOutcome::Failed => tracing::warn!("requested refresh failed"),
            RefreshOutcome::Busy => tracing::debug!("refresh already running"),
        }
    }
}
