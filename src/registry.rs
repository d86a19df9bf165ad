//! Registry of every connection a pool currently owns, idle or borrowed

use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::{ConnectionId, ManagedConnection};

/// Concurrent set of live connections, keyed by connection id.
///
/// Kept apart from the idle collection so bulk operations reach borrowed
/// connections too. Consistency is weaker than the slot accounting: a
/// connection becomes visible once added and stays until removed.
pub(crate) struct LiveConnectionRegistry<C> {
    live: DashMap<ConnectionId, Arc<ManagedConnection<C>>>,
}

impl<C> LiveConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
        }
    }

    pub fn add(&self, conn: &Arc<ManagedConnection<C>>) {
        self.live.insert(conn.id(), Arc::clone(conn));
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.live.remove(&id).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.live.contains_key(&id)
    }

    /// Point-in-time copy, safe to iterate while the registry changes
    pub fn snapshot(&self) -> Vec<Arc<ManagedConnection<C>>> {
        self.live.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn size(&self) -> usize {
        self.live.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<C> Default for LiveConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
