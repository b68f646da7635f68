//! Refresh triggers keeping the session's permissions current.
//!
//! Each trigger re-pulls the user record into the [`SessionStore`] through
//! [`SessionStore::refresh_permissions`]:
//!
//!  - [`polling`] refreshes on a fixed interval while a user is signed in,
//!  - [`focus`] refreshes once whenever the application regains focus,
//!  - [`push`] refreshes when the server announces a permission change for the current user,
//!  - [`manual`] refreshes on demand, e.g. from a "refresh" button.
//!
//! Background triggers run as tasks owned by a [`TriggerHandle`]. Dropping the handle or calling
//! [`TriggerHandle::stop`] tears the task down. [`RefreshTriggers`] starts the configured set.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::SessionStore;
use crate::push::PushChannel;

pub mod focus;
pub mod manual;
pub mod polling;
pub mod push;

pub use focus::{FocusEvent, FocusTrigger};
pub use manual::{ManualRefresh, RefreshOutcome};

/// Owner of a background trigger task.
///
/// The task is cancelled when the handle is dropped. Use [`stop`](Self::stop) to additionally
/// wait for the task to finish.
#[derive(Debug)]
pub struct TriggerHandle {
    name: &'static str,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TriggerHandle {
    pub(crate) fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(cancel.child_token()));
        tracing::debug!(trigger = name, "started refresh trigger");

        Self {
            name,
            cancel,
            task: Some(task),
        }
    }

    /// Returns the trigger's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancels the trigger and waits for its task to exit.
    ///
    /// A refresh that is already in flight is allowed to complete.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::error!(
                trigger = self.name,
                error = &err as &dyn std::error::Error,
                "refresh trigger panicked"
            );
        }
        tracing::debug!(trigger = self.name, "stopped refresh trigger");
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Which refresh triggers to run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Refresh on a fixed interval while signed in.
    pub polling: bool,
    /// Interval between polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Refresh when the application regains focus.
    pub focus: bool,
    /// Refresh on server push events.
    pub push: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            polling: true,
            poll_interval: Duration::from_secs(5),
            focus: true,
            push: true,
        }
    }
}

/// The set of triggers running for one session.
#[derive(Debug)]
pub struct RefreshTriggers {
    handles: Vec<TriggerHandle>,
    manual: ManualRefresh,
    focus: Option<FocusTrigger>,
}

impl RefreshTriggers {
    /// Starts the triggers enabled in `config`.
    ///
    /// The push trigger needs a `channel`; without one it is skipped even if enabled.
    pub fn start(
        store: &SessionStore,
        config: &TriggerConfig,
        channel: Option<Arc<dyn PushChannel>>,
    ) -> Self {
        let mut handles = Vec::new();

        if config.polling {
            handles.push(polling::spawn(store.clone(), config.poll_interval));
        }

        match channel {
            Some(channel) if config.push => handles.push(push::spawn(store.clone(), channel)),
            None if config.push => {
                tracing::debug!("push refresh enabled without a push channel, skipping");
            }
            _ => {}
        }

        Self {
            handles,
            manual: ManualRefresh::new(store.clone()),
            focus: config.focus.then(|| FocusTrigger::new(store.clone())),
        }
    }

    /// Returns the on-demand refresh trigger.
    pub fn manual(&self) -> &ManualRefresh {
        &self.manual
    }

    /// Returns the focus trigger, if enabled.
    pub fn focus(&self) -> Option<&FocusTrigger> {
        self.focus.as_ref()
    }

    /// Returns the names of the running background triggers.
    pub fn running(&self) -> Vec<&'static str> {
        self.handles
            .iter()
            .filter(|handle| !handle.is_finished())
            .map(TriggerHandle::name)
            .collect()
    }

    /// Stops all background triggers and waits for them to exit.
    pub async fn stop(self) {
        for handle in self.handles {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::SessionConfig;
    use crate::push::EventHub;
    use crate::testutil::{ScriptedBackend, store};

    use super::*;

    #[tokio::test]
    async fn starts_configured_triggers() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = store(&backend, SessionConfig::default());
        let hub: Arc<dyn PushChannel> = Arc::new(EventHub::new());

        let triggers = RefreshTriggers::start(&session, &TriggerConfig::default(), Some(hub));
        assert_eq!(triggers.running(), ["polling", "push"]);
        assert!(triggers.focus().is_some());
        triggers.stop().await;

        let config = TriggerConfig {
            polling: false,
            focus: false,
            ..Default::default()
        };
        let triggers = RefreshTriggers::start(&session, &config, None);
        assert!(triggers.running().is_empty());
        assert!(triggers.focus().is_none());
    }

    #[tokio::test]
    async fn dropping_handle_cancels_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = TriggerHandle::spawn("test", |cancel| async move {
            cancel.cancelled().await;
            tx.send(()).ok();
        });

        drop(handle);
        rx.await.unwrap();
    }
}
