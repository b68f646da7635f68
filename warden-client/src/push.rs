//! Server push plumbing.
//!
//! The console pushes per-user events over a named-event channel. This module abstracts over the
//! transport with [`PushChannel`] and provides [`EventHub`], an in-process implementation used
//! by embedders that already receive events through other means, and by tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

/// A live binding to one named event.
///
/// Payloads arrive on [`events`](Self::events). Dropping the subscription without
/// [unsubscribing](PushChannel::unsubscribe) is allowed; the channel prunes closed bindings when
/// it next publishes.
#[derive(Debug)]
pub struct Subscription {
    event: String,
    id: u64,
    /// Payloads delivered for the event.
    pub events: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    /// Creates a subscription handle; used by [`PushChannel`] implementations.
    pub fn new(event: impl Into<String>, id: u64, events: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            event: event.into(),
            id,
            events,
        }
    }

    /// Name of the subscribed event.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Identifier of this binding within the channel.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A transport delivering named server events.
///
/// Unsubscribing removes exactly the binding identified by the subscription; other listeners of
/// the same event stay bound.
pub trait PushChannel: Send + Sync + fmt::Debug {
    /// Binds a new listener to `event`.
    fn subscribe(&self, event: &str) -> Subscription;

    /// Removes the binding `id` from `event`.
    fn unsubscribe(&self, event: &str, id: u64);
}

type Listeners = HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>;

/// An in-process [`PushChannel`].
#[derive(Debug, Default)]
pub struct EventHub {
    next_id: AtomicU64,
    listeners: Mutex<Listeners>,
}

impl EventHub {
    /// Creates a hub without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `payload` to every listener of `event`, returning how many received it.
    pub fn publish(&self, event: &str, payload: Value) -> usize {
        // NB: Listener maps are only mutated under this lock without panicking code in between.
        let mut listeners = self.listeners.lock().unwrap();
        let Some(bound) = listeners.get_mut(event) else {
            tracing::trace!(event, "no listeners for push event");
            return 0;
        };

        bound.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        let delivered = bound.len();
        if bound.is_empty() {
            listeners.remove(event);
        }
        delivered
    }

    /// Returns the number of live bindings for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        let listeners = self.listeners.lock().unwrap();
        listeners
            .get(event)
            .map(|bound| bound.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl PushChannel for EventHub {
    fn subscribe(&self, event: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap()
            .entry(event.to_owned())
            .or_default()
            .push((id, tx));
        Subscription::new(event, id, rx)
    }

    fn unsubscribe(&self, event: &str, id: u64) {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(bound) = listeners.get_mut(event) {
            bound.retain(|(bound_id, _)| *bound_id != id);
            if bound.is_empty() {
                listeners.remove(event);
            }
        }
    }
}
