//! Connection registry
//!
//! Maps each user to at most one live [`Connection`]. All structural changes
//! and reads go through a single mutex that is held only for the map
//! operation itself, never across an await point or any I/O.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use agora_protocol::UserId;

use crate::connection::Connection;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<UserId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Arc<Connection>>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `conn` for `user_id`, returning the connection it replaced.
    ///
    /// The caller must close the returned connection after this call returns.
    pub fn register(&self, user_id: UserId, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let connection_id = conn.id();
        let (previous, online) = {
            let mut map = self.lock();
            let previous = map.insert(user_id, conn);
            (previous, map.len())
        };

        debug!(
            component = "registry",
            event = "registry.connection.registered",
            user_id,
            connection_id,
            replaced = previous.as_ref().map(|c| c.id()),
            online,
            "Connection registered"
        );
        previous
    }

    /// Remove the entry for `user_id` only if it still points at `conn`.
    ///
    /// A connection that was already superseded must not evict its successor,
    /// so this is a no-op (returning `false`) when the slot holds another
    /// connection.
    pub fn deregister(&self, user_id: UserId, conn: &Arc<Connection>) -> bool {
        let removed = {
            let mut map = self.lock();
            match map.get(&user_id) {
                Some(current) if Arc::ptr_eq(current, conn) => {
                    map.remove(&user_id);
                    true
                }
                _ => false,
            }
        };

        debug!(
            component = "registry",
            event = "registry.connection.deregistered",
            user_id,
            connection_id = conn.id(),
            removed,
            "Connection deregistration"
        );
        removed
    }

    /// Copy of the currently registered user ids.
    pub fn snapshot(&self) -> BTreeSet<UserId> {
        self.lock().keys().copied().collect()
    }

    pub fn get(&self, user_id: UserId) -> Option<Arc<Connection>> {
        self.lock().get(&user_id).cloned()
    }

    /// Copy of every registered connection, for fanout.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
