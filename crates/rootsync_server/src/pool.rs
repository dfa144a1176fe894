//! Connection pool.
//!
//! Maps client identities to their live connection so the server can
//! push to a specific client at any time.

use crate::error::{ServerError, ServerResult};
use crate::transport::{Connection, ConnectionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Shared handle to a live connection.
pub type ConnectionHandle = Arc<dyn Connection>;

#[derive(Debug)]
struct PoolEntry {
    handle: ConnectionHandle,
    updated_at: SystemTime,
}

/// Registry of live client connections.
///
/// At most one connection is held per client. Writers serialize on the
/// lock, so the last completed `register`/`update` wins.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `client_id` to `handle`, replacing any previous connection.
    pub fn register(&self, client_id: &str, handle: ConnectionHandle) {
        let connection = handle.id();
        let previous = self.entries.write().insert(
            client_id.to_string(),
            PoolEntry {
                handle,
                updated_at: SystemTime::now(),
            },
        );
        match previous {
            Some(old) if old.handle.id() != connection => debug!(
                client = %client_id,
                connection,
                replaced = old.handle.id(),
                "connection replaced"
            ),
            _ => debug!(client = %client_id, connection, "connection registered"),
        }
    }

    /// Rebinds `client_id` after a reconnect. Same as [`Self::register`].
    pub fn update(&self, client_id: &str, handle: ConnectionHandle) {
        self.register(client_id, handle);
    }

    /// Returns the live connection of `client_id`.
    pub fn lookup(&self, client_id: &str) -> ServerResult<ConnectionHandle> {
        self.entries
            .read()
            .get(client_id)
            .map(|entry| Arc::clone(&entry.handle))
            .ok_or_else(|| ServerError::not_found("connection", client_id))
    }

    /// Removes the entry of `client_id`. Returns true if one existed.
    pub fn evict(&self, client_id: &str) -> bool {
        self.entries.write().remove(client_id).is_some()
    }

    /// Removes the entry of `client_id` only if it still holds `connection`.
    ///
    /// A superseded connection closing late must not evict its replacement.
    pub fn evict_if_current(&self, client_id: &str, connection: ConnectionId) -> bool {
        let mut entries = self.entries.write();
        match entries.get(client_id) {
            Some(entry) if entry.handle.id() == connection => {
                entries.remove(client_id);
                debug!(client = %client_id, connection, "connection evicted");
                true
            }
            _ => false,
        }
    }

    /// Removes every entry bound to `connection`. Returns how many were removed.
    pub fn evict_connection(&self, connection: ConnectionId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|client, entry| {
            let keep = entry.handle.id() != connection;
            if !keep {
                debug!(client = %client, connection, "connection evicted");
            }
            keep
        });
        before - entries.len()
    }

    /// Returns the time the entry of `client_id` was last written.
    pub fn updated_at(&self, client_id: &str) -> Option<SystemTime> {
        self.entries.read().get(client_id).map(|e| e.updated_at)
    }

    /// Returns the connected client ids, sorted.
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the number of connected clients.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no client is connected.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryLink;

    fn handle() -> ConnectionHandle {
        let (link, _) = MemoryLink::new("127.0.0.1:1");
        link.connection()
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let pool = ConnectionPool::new();
        assert!(matches!(
            pool.lookup("c1"),
            Err(ServerError::NotFound { .. })
        ));
    }

    #[test]
    fn register_then_lookup() {
        let pool = ConnectionPool::new();
        let h = handle();
        pool.register("c1", Arc::clone(&h));
        assert_eq!(pool.lookup("c1").unwrap().id(), h.id());
        assert_eq!(pool.len(), 1);
        assert!(pool.updated_at("c1").is_some());
    }

    #[test]
    fn update_replaces_previous() {
        let pool = ConnectionPool::new();
        let first = handle();
        let second = handle();
        pool.register("c1", Arc::clone(&first));
        pool.update("c1", Arc::clone(&second));

        assert_eq!(pool.lookup("c1").unwrap().id(), second.id());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn evict_removes_entry() {
        let pool = ConnectionPool::new();
        pool.register("c1", handle());
        assert!(pool.evict("c1"));
        assert!(!pool.evict("c1"));
        assert!(pool.lookup("c1").is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn stale_connection_does_not_evict_replacement() {
        let pool = ConnectionPool::new();
        let old = handle();
        let new = handle();
        pool.register("c1", Arc::clone(&old));
        pool.update("c1", Arc::clone(&new));

        assert!(!pool.evict_if_current("c1", old.id()));
        assert_eq!(pool.lookup("c1").unwrap().id(), new.id());
        assert!(pool.evict_if_current("c1", new.id()));
        assert!(pool.is_empty());
    }

    #[test]
    fn evict_connection_removes_all_its_bindings() {
        let pool = ConnectionPool::new();
        let shared = handle();
        let other = handle();
        pool.register("a", Arc::clone(&shared));
        pool.register("b", Arc::clone(&shared));
        pool.register("c", Arc::clone(&other));

        assert_eq!(pool.evict_connection(shared.id()), 2);
        assert_eq!(pool.client_ids(), vec!["c".to_string()]);
        assert_eq!(pool.evict_connection(shared.id()), 0);
    }

    #[test]
    fn concurrent_updates_keep_one_entry() {
        let pool = Arc::new(ConnectionPool::new());
        let handles: Vec<_> = (0..8).map(|_| handle()).collect();
        let ids: Vec<_> = handles.iter().map(|h| h.id()).collect();

        std::thread::scope(|scope| {
            for h in &handles {
                let pool = Arc::clone(&pool);
                let h = Arc::clone(h);
                scope.spawn(move || pool.update("c1", h));
            }
        });

        assert_eq!(pool.len(), 1);
        assert!(ids.contains(&pool.lookup("c1").unwrap().id()));
    }

    #[test]
    fn client_ids_sorted() {
        let pool = ConnectionPool::new();
        pool.register("b", handle());
        pool.register("a", handle());
        assert_eq!(pool.client_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
