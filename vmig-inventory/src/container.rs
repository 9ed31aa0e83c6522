//! Reconciler container.
//!
//! Process-wide registry mapping provider identity to its running
//! reconciler. Replacement is explicit on the controller's side:
//! `get` the old entry, shut it down, `add` the new one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::provider::ProviderKey;
use crate::reconciler::Reconciler;

#[derive(Default)]
pub struct ReconcilerContainer {
    content: RwLock<HashMap<ProviderKey, Arc<Reconciler>>>,
}

impl ReconcilerContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reconciler. No side effects; an existing entry is
    /// replaced atomically.
    pub fn add(&self, key: ProviderKey, reconciler: Arc<Reconciler>) {
        self.content.write().unwrap().insert(key, reconciler);
    }

    pub fn get(&self, key: &ProviderKey) -> Option<Arc<Reconciler>> {
        self.content.read().unwrap().get(key).cloned()
    }

    /// Take a reconciler out of the registry.
    pub fn remove(&self, key: &ProviderKey) -> Option<Arc<Reconciler>> {
        self.content.write().unwrap().remove(key)
    }

    /// Lookup by the provider's namespace and name, as the query
    /// surface addresses providers.
    pub fn find(&self, namespace: &str, name: &str) -> Option<Arc<Reconciler>> {
        self.content
            .read()
            .unwrap()
            .values()
            .find(|r| {
                let provider = r.provider();
                provider.namespace == namespace && provider.name == name
            })
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<Reconciler>> {
        self.content.read().unwrap().values().cloned().collect()
    }
}
