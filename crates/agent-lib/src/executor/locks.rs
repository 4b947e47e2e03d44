//! Per-resource mutual exclusion
//!
//! Every mutation of a resource happens while holding that resource's
//! token. Tokens are released when dropped, after the holder entry has
//! been cleared.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Token table keyed by resource id
#[derive(Clone, Default)]
pub struct ResourceLocks {
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
    holders: Arc<DashMap<String, String>>,
}

/// Exclusive right to mutate one resource
pub struct ResourceToken {
    resource_id: String,
    action_id: String,
    holders: Arc<DashMap<String, String>>,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceToken {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }
}

impl Drop for ResourceToken {
    fn drop(&mut self) {
        self.holders
            .remove_if(&self.resource_id, |_, holder| holder == &self.action_id);
    }
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, resource_id: &str) -> Arc<Mutex<()>> {
        // Clone the Arc out so the map shard is not held across an await
        self.slots
            .entry(resource_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Wait for the resource's token
    pub async fn acquire(&self, resource_id: &str, action_id: &str) -> ResourceToken {
        let guard = self.slot(resource_id).lock_owned().await;
        self.token(resource_id, action_id, guard)
    }

    /// Take the token only if nobody holds it
    #[cfg(test)]
    pub(crate) fn try_acquire(&self, resource_id: &str, action_id: &str) -> Option<ResourceToken> {
        let guard = self.slot(resource_id).try_lock_owned().ok()?;
        Some(self.token(resource_id, action_id, guard))
    }

    /// Action currently holding the resource's token
    #[cfg(test)]
    pub(crate) fn holder(&self, resource_id: &str) -> Option<String> {
        self.holders.get(resource_id).map(|h| h.value().clone())
    }

    fn token(&self, resource_id: &str, action_id: &str, guard: OwnedMutexGuard<()>) -> ResourceToken {
        self.holders
            .insert(resource_id.to_string(), action_id.to_string());
        ResourceToken {
            resource_id: resource_id.to_string(),
            action_id: action_id.to_string(),
            holders: Arc::clone(&self.holders),
            _guard: guard,
        }
    }
}
