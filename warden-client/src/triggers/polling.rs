//! Interval-based refresh.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::TriggerHandle;
use crate::SessionStore;

/// Spawns a task refreshing `store` every `period` while a user is signed in.
///
/// The timer only runs while signed in. It starts over after every sign-in, so the first refresh
/// happens one full period after the session begins.
pub fn spawn(store: SessionStore, period: Duration) -> TriggerHandle {
    TriggerHandle::spawn("polling", move |cancel| run(store, period, cancel))
}

enum Wake {
    Tick,
    Changed,
    Stop,
}

async fn run(store: SessionStore, period: Duration, cancel: CancellationToken) {
    let mut changes = store.subscribe();

    loop {
        while !changes.borrow_and_update().is_authenticated() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        tracing::debug!(?period, "polling permissions");
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                _ = cancel.cancelled() => Wake::Stop,
                _ = ticker.tick() => Wake::Tick,
                changed = changes.changed() => match changed {
                    Ok(()) => Wake::Changed,
                    Err(_) => Wake::Stop,
                },
            };

            match wake {
                Wake::Stop => return,
                Wake::Tick => {
                    store.refresh_permissions().await;
                }
                Wake::Changed => {
                    if !changes.borrow_and_update().is_authenticated() {
                        tracing::debug!("signed out, pausing permission polling");
                        break;
                    }
                }
            }
        }
    }
}
