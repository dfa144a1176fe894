//! # rootsync storage
//!
//! Key-value store abstraction used by the rootsync server.
//!
//! Stores are **opaque byte maps**: they never interpret keys or values.
//! The server decides the key layout and the value encoding.
//!
//! ## Design Principles
//!
//! - Simple operations: get, put, delete, prefix scan, flush
//! - Every method takes `&self`; implementations synchronize internally
//! - Must be `Send + Sync` so one store can be shared by every connection task
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral servers
//! - [`FileStore`] - Durable store backed by an append-only log
//!
//! ## Example
//!
//! ```rust
//! use rootsync_storage::{InMemoryStore, KvStore};
//!
//! let store = InMemoryStore::new();
//! store.put(b"client/abc", b"payload").unwrap();
//! assert_eq!(store.get(b"client/abc").unwrap(), Some(b"payload".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::KvStore;
