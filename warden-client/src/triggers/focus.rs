//! Refresh when the application regains focus.

use tokio::sync::mpsc;

use super::TriggerHandle;
use crate::SessionStore;

/// A change in application focus or visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusEvent {
    /// The application became visible or focused.
    Gained,
    /// The application was hidden or lost focus.
    Lost,
}

/// Refreshes the session once per focus gain.
#[derive(Debug, Clone)]
pub struct FocusTrigger {
    store: SessionStore,
}

impl FocusTrigger {
    /// Creates a trigger for `store`.
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Handles a focus gain.
    ///
    /// Issues exactly one refresh if a user is signed in and returns its result. Returns `None`
    /// without touching the network otherwise.
    pub async fn focus_gained(&self) -> Option<bool> {
        if !self.store.snapshot().is_authenticated() {
            return None;
        }
        Some(self.store.refresh_permissions().await)
    }

    /// Spawns a task feeding focus `events` into this trigger.
    ///
    /// The task exits when the sender side is dropped or the handle is stopped.
    pub fn listen(self, mut events: mpsc::Receiver<FocusEvent>) -> TriggerHandle {
        TriggerHandle::spawn("focus", move |cancel| async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => event,
                };

                match event {
                    Some(FocusEvent::Gained) => {
                        self.focus_gained().await;
                    }
                    Some(FocusEvent::Lost) => {}
                    None => return,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::SessionConfig;
    use crate::testutil::{ScriptedBackend, signed_in, store, user};

    use super::*;

    #[tokio::test]
    async fn refreshes_once_per_focus_gain() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = signed_in(&backend, user("42", &[]), SessionConfig::default()).await;
        let trigger = FocusTrigger::new(session);

        assert_eq!(trigger.focus_gained().await, Some(true));
        assert_eq!(backend.whoami_calls(), 1);
    }

    #[tokio::test]
    async fn ignores_focus_without_user() {
        let backend = Arc::new(ScriptedBackend::default());
        let trigger = FocusTrigger::new(store(&backend, SessionConfig::default()));

        assert_eq!(trigger.focus_gained().await, None);
        assert_eq!(backend.whoami_calls(), 0);
    }

    #[tokio::test]
    async fn listens_to_focus_events() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = signed_in(&backend, user("42", &[]), SessionConfig::default()).await;

        let (tx, rx) = mpsc::channel(4);
        let handle = FocusTrigger::new(session).listen(rx);

        tx.send(FocusEvent::Lost).await.unwrap();
        tx.send(FocusEvent::Gained).await.unwrap();
        tx.send(FocusEvent::Gained).await.unwrap();
        drop(tx);

        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.whoami_calls(), 2);
    }
}
