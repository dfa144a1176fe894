//! # rootsync server
//!
//! Multi-client file synchronization server.
//!
//! This crate provides:
//! - A connection pool mapping client identities to their live connection
//! - A transaction dispatcher routing named, streaming transactions
//! - Client and root directory registration
//! - A sync engine that accepts file versions or stages them as conflicts
//! - Bounded-use share links
//! - An administrative HTTP router (`axum`)
//!
//! # Architecture
//!
//! ```text
//! transport ──► Dispatcher ──► REGISTERCLIENT ──► RegistrationService ──► ConnectionPool
//!                   │
//!                   └──► PUSHFILE / RESOLVECONFLICT / SHAREFILE / ...
//!                              │
//!                              ▼
//!               SyncEngine / SharingService ──► Repository ──► KvStore
//!                              │
//!                              └──► Notifier ──► ConnectionPool ──► other clients
//! ```
//!
//! The secure transport itself is not part of this crate. Transports
//! implement [`Connection`] and [`MessageStream`] and hand inbound
//! transactions to [`SyncServer::accept`]. [`MemoryLink`] is an in-process
//! transport used by tests.
//!
//! # Example
//!
//! ```
//! use rootsync_server::{ServerConfig, SyncServer};
//!
//! let server = SyncServer::in_memory(ServerConfig::default()).unwrap();
//! assert!(server.pool().is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod admin;
mod clock;
mod config;
mod dispatcher;
mod error;
mod handlers;
mod locks;
mod notify;
mod pool;
mod registration;
mod repository;
mod server;
mod sharing;
mod sync;
mod transport;

pub use admin::{build_router, AdminState};
pub use clock::{format_timestamp, MonotonicClock};
pub use config::ServerConfig;
pub use dispatcher::{
    ConnectionState, Dispatcher, DispatcherBuilder, InitialHandler, Session, TransactionContext,
    TransactionHandler,
};
pub use error::{ServerError, ServerResult};
pub use locks::{KeyGuard, KeyedLocks};
pub use notify::Notifier;
pub use pool::{ConnectionHandle, ConnectionPool};
pub use registration::RegistrationService;
pub use repository::Repository;
pub use server::SyncServer;
pub use sharing::SharingService;
pub use sync::{Submission, SyncEngine};
pub use transport::{
    memory_stream_pair, Connection, ConnectionId, InboundTransaction, MemoryConnection,
    MemoryLink, MemoryStream, MessageStream,
};
