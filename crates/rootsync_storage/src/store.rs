//! Key-value store trait definition.

use crate::error::StorageResult;

/// A durable key-value store.
///
/// # Invariants
///
/// - `get` returns exactly the bytes of the last `put` for that key, or
///   `None` after a `delete`
/// - `scan_prefix` returns entries in ascending key order
/// - once `put`/`delete` return `Ok`, the change survives a process restart
///   for durable implementations
/// - implementations must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Deleting a missing key is not an error.
    ///
    /// Returns true if the key existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete cannot be made durable.
    fn delete(&self, key: &[u8]) -> StorageResult<bool>;

    /// Returns every entry whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Flushes pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;
}
