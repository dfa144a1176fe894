//! Per-key mutual exclusion.

use crate::error::{ServerError, ServerResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

/// A set of mutexes addressed by string key.
///
/// Used to serialize read-modify-write cycles on one stored record
/// (a file path, a share link, a client) while unrelated keys proceed in
/// parallel. Only keys currently held take up space.
///
/// [`KeyedLocks::lock`] parks the calling thread. Async code must not call
/// it (or any service method that takes one) on a runtime worker; wrap the
/// call in `tokio::task::spawn_blocking` instead.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl KeyedLocks {
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock for `key` is held.
    pub fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(key) {
            self.released.wait(&mut held);
        }
        held.insert(key.to_string());

        KeyGuard {
            owner: self,
            key: key.to_string(),
        }
    }

    /// Returns the number of keys currently locked.
    pub fn active(&self) -> usize {
        self.held.lock().len()
    }
}

/// Runs `f` on the runtime's blocking pool and waits for its result.
///
/// Service methods take [`KeyedLocks`] and sync the store to disk, so the
/// transaction handlers and admin routes call them through here.
pub(crate) async fn run_blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
}

/// Holds the lock for one key until dropped.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.owner.held.lock().remove(&self.key);
        self.owner.released.notify_all();
    }
}
