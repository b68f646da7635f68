//! Refresh on server push events.
//!
//! The trigger follows the session: it binds the two per-user event names of the signed-in user,
//! rebinds when the user changes and unbinds on sign-out or teardown. Only the bindings it
//! created are removed, other listeners of the same events are left alone.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use warden_types::PushEvent;

use super::TriggerHandle;
use crate::push::{PushChannel, Subscription};
use crate::{Notice, SessionStore};

/// Spawns a task refreshing `store` whenever `channel` delivers an event for the current user.
pub fn spawn(store: SessionStore, channel: Arc<dyn PushChannel>) -> TriggerHandle {
    TriggerHandle::spawn("push", move |cancel| run(store, channel, cancel))
}

#[derive(Debug)]
struct Bound {
    user_id: String,
    updated: Subscription,
    removed: Subscription,
}

impl Bound {
    fn bind(channel: &dyn PushChannel, user_id: &str) -> Self {
        let [updated, removed] = PushEvent::names_for(user_id);
        tracing::debug!(user = user_id, "binding permission push events");

        Self {
            user_id: user_id.to_owned(),
            updated: channel.subscribe(&updated),
            removed: channel.subscribe(&removed),
        }
    }

    fn unbind(self, channel: &dyn PushChannel) {
        tracing::debug!(user = %self.user_id, "unbinding permission push events");
        channel.unsubscribe(self.updated.event(), self.updated.id());
        channel.unsubscribe(self.removed.event(), self.removed.id());
    }
}

enum Wake {
    Event(PushEvent),
    Changed,
    Stop,
}

async fn run(store: SessionStore, channel: Arc<dyn PushChannel>, cancel: CancellationToken) {
    let mut changes = store.subscribe();
    let mut bound: Option<Bound> = None;

    loop {
        let user_id = changes.borrow_and_update().user_id().map(str::to_owned);
        if bound.as_ref().map(|b| b.user_id.as_str()) != user_id.as_deref() {
            if let Some(previous) = bound.take() {
                previous.unbind(&*channel);
            }
            bound = user_id.map(|id| Bound::bind(&*channel, &id));
        }

        let wake = tokio::select! {
            _ = cancel.cancelled() => Wake::Stop,
            changed = changes.changed() => match changed {
                Ok(()) => Wake::Changed,
                Err(_) => Wake::Stop,
            },
            event = next_event(&mut bound) => Wake::Event(event),
        };

        match wake {
            Wake::Stop => break,
            Wake::Changed => continue,
            Wake::Event(event) => handle(&store, event).await,
        }
    }

    if let Some(previous) = bound.take() {
        previous.unbind(&*channel);
    }
}

enum Source {
    Updated,
    Removed,
}

/// Waits for the next well-formed event addressed to the bound user.
///
/// Never resolves while unbound or after both subscriptions have closed.
async fn next_event(bound: &mut Option<Bound>) -> PushEvent {
    let Some(bound) = bound else {
        return std::future::pending().await;
    };

    loop {
        let received: Option<(Source, Value)> = tokio::select! {
            Some(payload) = bound.updated.events.recv() => Some((Source::Updated, payload)),
            Some(payload) = bound.removed.events.recv() => Some((Source::Removed, payload)),
            else => None,
        };

        let Some((source, payload)) = received else {
            return std::future::pending().await;
        };

        let name = match source {
            Source::Updated => bound.updated.event(),
            Source::Removed => bound.removed.event(),
        };

        match PushEvent::decode(name, payload) {
            Ok(Some(event)) if event.user_id() == bound.user_id => return event,
            Ok(Some(event)) => {
                tracing::debug!(
                    event = name,
                    addressed_to = event.user_id(),
                    "ignoring push event for another user"
                );
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    event = name,
                    error = &err as &dyn std::error::Error,
                    "malformed push event payload"
                );
            }
        }
    }
}

async fn handle(store: &SessionStore, event: PushEvent) {
    tracing::info!(event = %event.name(), "permissions changed on the server");
    store.refresh_permissions().await;

    if store.snapshot().user_id() != Some(event.user_id()) {
        tracing::debug!(
            event = %event.name(),
            "session changed while handling push event, dropping notice"
        );
        return;
    }

    let notice = match event {
        PushEvent::PermissionsUpdated(updated) => Notice::PermissionsUpdated {
            message: updated.message,
        },
        PushEvent::RoleRemoved(removed) => Notice::RoleRemoved {
            role_name: removed.role_name,
            message: removed.message,
        },
    };
    store.notify(notice);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::push::EventHub;
    use crate::testutil::{ScriptedBackend, signed_in, user, wait_for_calls};
    use crate::{Credentials, SessionConfig};

    use super::*;

    const UPDATED: &str = "user:42:permissions-updated";
    const REMOVED: &str = "user:42:role-removed";

    async fn wait_for_listeners(hub: &EventHub, event: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.subscriber_count(event) != count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn role_removed_refreshes_and_notifies() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = signed_in(&backend, user("42", &["a:view"]), SessionConfig::default()).await;
        let mut notices = session.notices();

        let hub = Arc::new(EventHub::new());
        let handle = spawn(session.clone(), hub.clone());
        wait_for_listeners(&hub, REMOVED, 1).await;

        backend.register("jdoe", user("42", &[]));
        hub.publish(
            REMOVED,
            json!({"userId": "42", "roleId": "7", "roleName": "Auditor", "message": ""}),
        );

        let notice = notices.recv().await.unwrap();
        assert_eq!(
            notice,
            Notice::RoleRemoved {
                role_name: "Auditor".into(),
                message: String::new(),
            }
        );
        assert_eq!(backend.whoami_calls(), 1);
        assert!(!session.has_permission("a", "view"));

        handle.stop().await;
        assert_eq!(hub.subscriber_count(UPDATED), 0);
        assert_eq!(hub.subscriber_count(REMOVED), 0);
    }

    #[tokio::test]
    async fn ignores_events_for_other_users() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = signed_in(&backend, user("42", &[]), SessionConfig::default()).await;
        let mut notices = session.notices();

        let hub = Arc::new(EventHub::new());
        let handle = spawn(session.clone(), hub.clone());
        wait_for_listeners(&hub, UPDATED, 1).await;

        hub.publish(UPDATED, json!({"userId": "7", "message": "not yours"}));
        hub.publish(UPDATED, json!({"userId": 42, "message": "yours"}));

        let notice = notices.recv().await.unwrap();
        assert_eq!(
            notice,
            Notice::PermissionsUpdated {
                message: "yours".into()
            }
        );
        assert_eq!(backend.whoami_calls(), 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn unbinds_on_logout_and_keeps_foreign_listeners() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = signed_in(&backend, user("42", &[]), SessionConfig::default()).await;

        let hub = Arc::new(EventHub::new());
        let _foreign = hub.subscribe(UPDATED);
        let handle = spawn(session.clone(), hub.clone());
        wait_for_listeners(&hub, UPDATED, 2).await;

        session.logout();
        wait_for_listeners(&hub, UPDATED, 1).await;
        wait_for_listeners(&hub, REMOVED, 0).await;

        handle.stop().await;
    }

    #[tokio::test]
    async fn rebinds_when_another_user_signs_in() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = signed_in(&backend, user("42", &[]), SessionConfig::default()).await;
        let mut notices = session.notices();

        let hub = Arc::new(EventHub::new());
        let handle = spawn(session.clone(), hub.clone());
        wait_for_listeners(&hub, UPDATED, 1).await;

        backend.register("asmith", user("43", &[]));
        session
            .login(&Credentials::new("asmith", "secret"))
            .await
            .unwrap();

        wait_for_listeners(&hub, UPDATED, 0).await;
        wait_for_listeners(&hub, REMOVED, 0).await;
        wait_for_listeners(&hub, "user:43:permissions-updated", 1).await;
        wait_for_listeners(&hub, "user:43:role-removed", 1).await;

        assert_eq!(
            hub.publish(UPDATED, json!({"userId": "42", "message": "stale"})),
            0
        );
        hub.publish(
            "user:43:permissions-updated",
            json!({"userId": "43", "message": "fresh"}),
        );

        let notice = notices.recv().await.unwrap();
        assert_eq!(
            notice,
            Notice::PermissionsUpdated {
                message: "fresh".into()
            }
        );
        assert_eq!(backend.whoami_calls(), 1);

        handle.stop().await;
        assert_eq!(hub.subscriber_count("user:43:permissions-updated"), 0);
    }

    #[tokio::test]
    async fn drops_notice_when_session_changes_during_refresh() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = signed_in(&backend, user("42", &[]), SessionConfig::default()).await;
        let mut notices = session.notices();

        let hub = Arc::new(EventHub::new());
        let handle = spawn(session.clone(), hub.clone());
        wait_for_listeners(&hub, REMOVED, 1).await;

        let pending = backend.defer_whoami();
        hub.publish(
            REMOVED,
            json!({"userId": "42", "roleId": "7", "roleName": "Auditor", "message": ""}),
        );
        wait_for_calls(&backend, 1).await;

        session.logout();
        pending.send(Ok(user("42", &[]))).unwrap();
        assert_eq!(notices.recv().await.unwrap(), Notice::SignedOut);

        backend.register("asmith", user("43", &[]));
        session
            .login(&Credentials::new("asmith", "secret"))
            .await
            .unwrap();
        wait_for_listeners(&hub, "user:43:permissions-updated", 1).await;
        hub.publish(
            "user:43:permissions-updated",
            json!({"userId": "43", "message": "fresh"}),
        );

        assert_eq!(
            notices.recv().await.unwrap(),
            Notice::PermissionsUpdated {
                message: "fresh".into()
            }
        );
        assert!(notices.try_recv().is_err());

        handle.stop().await;
    }
}
