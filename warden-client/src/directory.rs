use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use warden_types::PermissionEntry;

use crate::{Backend, TokenStore};

/// A lazily loaded catalog of every permission the console knows about.
///
/// The catalog is fetched once on first use and then served from memory. Concurrent first
/// callers share a single request. A failed fetch is not cached, the next call retries.
#[derive(Debug)]
pub struct PermissionDirectory {
    backend: Arc<dyn Backend>,
    tokens: Arc<dyn TokenStore>,
    entries: OnceCell<Arc<[PermissionEntry]>>,
}

impl PermissionDirectory {
    /// Creates an empty directory.
    pub fn new(backend: Arc<dyn Backend>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            backend,
            tokens,
            entries: OnceCell::new(),
        }
    }

    /// Returns all catalog entries, fetching them on first use.
    pub async fn entries(&self) -> crate::Result<Arc<[PermissionEntry]>> {
        let entries = self
            .entries
            .get_or_try_init(|| async {
                let token = self.tokens.load();
                let entries = self.backend.permissions(token.as_deref()).await?;
                tracing::debug!(count = entries.len(), "loaded permission catalog");
                Ok::<_, crate::Error>(Arc::from(entries))
            })
            .await?;

        Ok(Arc::clone(entries))
    }

    /// Returns the entry with the given id.
    pub async fn get(&self, id: &str) -> crate::Result<Option<PermissionEntry>> {
        let entries = self.entries().await?;
        Ok(entries.iter().find(|entry| entry.id == id).cloned())
    }

    /// Returns the catalog grouped by module, in module name order.
    pub async fn by_module(&self) -> crate::Result<BTreeMap<String, Vec<PermissionEntry>>> {
        let mut grouped = BTreeMap::<String, Vec<PermissionEntry>>::new();
        for entry in self.entries().await?.iter() {
            grouped
                .entry(entry.module.clone())
                .or_default()
                .push(entry.clone());
        }
        Ok(grouped)
    }

    /// Returns the catalog if it has already been loaded.
    pub fn cached(&self) -> Option<Arc<[PermissionEntry]>> {
        self.entries.get().cloned()
    }
}
