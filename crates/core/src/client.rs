//! Process-wide store client slot
//!
//! Every bucket holds a clone of the same [`SharedClient`]; replacing the
//! client through the registry is visible to all of them on their next
//! transaction.

use std::sync::{Arc, RwLock};

use crate::traits::BlobStore;

/// Shared, replaceable handle to the current store client
#[derive(Clone, Default)]
pub struct SharedClient {
    slot: Arc<RwLock<Option<Arc<dyn BlobStore>>>>,
}

impl SharedClient {
    /// An empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot already holding `store`
    pub fn with_store(store: Arc<dyn BlobStore>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(store))),
        }
    }

    /// The client as of now; transactions call this once when they start
    pub fn current(&self) -> Option<Arc<dyn BlobStore>> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    pub(crate) fn replace(&self, store: Arc<dyn BlobStore>) {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(store);
    }
}

impl std::fmt::Debug for SharedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedClient")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn test_replace_is_seen_by_clones() {
        let client = SharedClient::new();
        let clone = client.clone();
        assert!(!clone.is_connected());

        let store = MemoryStore::new();
        store.insert("b", "k", b"v".to_vec(), None);
        client.replace(Arc::new(store));

        let current = clone.current().unwrap();
        assert_eq!(current.list_blobs("b", "").unwrap(), vec!["k".to_string()]);
    }
}
