// Set of live client connections.
//
// The registry only holds weak references: the pumps own the handle, and
// a handle whose pumps are gone disappears from enumeration on its own.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use tracing::info;
use uuid::Uuid;

use super::client::ClientHandle;
use crate::metrics;

/// Verdict returned by a [`ClientRegistry::for_each`] visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Keep,
    Evict,
}

#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<Uuid, Weak<ClientHandle>>>>,
}

impl ClientRegistry {
    /// Returns false if the handle was already registered.
    pub fn register(&self, client: &Arc<ClientHandle>) -> bool {
        let mut guard = self.lock();
        if guard.get(&client.id()).is_some_and(|existing| existing.strong_count() > 0) {
            return false;
        }
        guard.insert(client.id(), Arc::downgrade(client));
        true
    }

    /// Returns false if the handle was not registered.
    pub fn unregister(&self, client_id: Uuid) -> bool {
        self.lock().remove(&client_id).is_some()
    }

    /// Visits every live member while holding the registry lock.
    ///
    /// Members the visitor evicts are removed before the lock is released.
    /// Returns the number of evicted members.
    pub fn for_each<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(&Arc<ClientHandle>) -> Membership,
    {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|_, weak| match weak.upgrade() {
            Some(client) => visit(&client) == Membership::Keep,
            None => false,
        });
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.lock().values().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, client_id: Uuid) -> bool {
        self.lock().get(&client_id).is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Tears a client down. Safe to call from either pump, any number of
    /// times; only the first call is logged and counted.
    pub fn release(&self, client: &ClientHandle, reason: &str) {
        self.unregister(client.id());
        client.outbound().close();
        if client.mark_closed() {
            metrics::increment_connections_closed();
            info!(
                client_id = %client.id(),
                identity = client.identity(),
                reason,
                active_clients = self.len(),
                "client disconnected"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Weak<ClientHandle>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientRegistry, Membership};
    use crate::ws::client::ClientHandle;

    #[test]
    fn register_is_idempotent_and_unregister_tolerates_absence() {
        let registry = ClientRegistry::default();
        let (client, _receiver) = ClientHandle::new("admin", 4);

        assert!(registry.register(&client));
        assert!(!registry.register(&client));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(client.id()));

        assert!(registry.unregister(client.id()));
        assert!(!registry.unregister(client.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn for_each_removes_evicted_members() {
        let registry = ClientRegistry::default();
        let (keep, _keep_rx) = ClientHandle::new("keep", 4);
        let (evict, _evict_rx) = ClientHandle::new("evict", 4);
        registry.register(&keep);
        registry.register(&evict);

        let mut visited = 0;
        let evicted = registry.for_each(|client| {
            visited += 1;
            if client.identity() == "evict" {
                Membership::Evict
            } else {
                Membership::Keep
            }
        });

        assert_eq!(visited, 2);
        assert_eq!(evicted, 1);
        assert!(registry.contains(keep.id()));
        assert!(!registry.contains(evict.id()));
    }

    #[test]
    fn dropped_handles_are_not_enumerated() {
        let registry = ClientRegistry::default();
        let (client, receiver) = ClientHandle::new("gone", 4);
        registry.register(&client);
        drop(receiver);
        drop(client);

        assert_eq!(registry.len(), 0);
        let mut visited = 0;
        registry.for_each(|_| {
            visited += 1;
            Membership::Keep
        });
        assert_eq!(visited, 0);
    }

    #[test]
    fn release_is_idempotent() {
        let registry = ClientRegistry::default();
        let (client, _receiver) = ClientHandle::new("admin", 4);
        registry.register(&client);

        registry.release(&client, "test");
        registry.release(&client, "test");

        assert!(registry.is_empty());
        assert!(client.is_closed());
        assert!(client.outbound().is_closed());
    }
}
