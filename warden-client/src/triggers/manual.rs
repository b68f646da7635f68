//! On-demand refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::SessionStore;

/// Result of a [`ManualRefresh::refresh`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The user record was re-fetched.
    Refreshed,
    /// The refresh failed; previous permissions remain in effect.
    Failed,
    /// Another manual refresh was still running; no request was issued.
    Busy,
}

/// A user-initiated refresh with a busy flag.
#[derive(Debug, Clone)]
pub struct ManualRefresh {
    store: SessionStore,
    refreshing: Arc<AtomicBool>,
}

impl ManualRefresh {
    /// Creates a manual trigger for `store`.
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns `true` while a manual refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Refreshes the session unless a manual refresh is already running.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("manual refresh already running");
            return RefreshOutcome::Busy;
        }

        let _busy = BusyGuard(&self.refreshing);
        if self.store.refresh_permissions().await {
            RefreshOutcome::Refreshed
        } else {
            RefreshOutcome::Failed
        }
    }
}

/// Clears the busy flag when the refresh completes or is cancelled.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
