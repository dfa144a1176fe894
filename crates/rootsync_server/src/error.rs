//! Error types for the sync server.

use rootsync_codec::CodecError;
use rootsync_storage::StorageError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request contents.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The client may not touch this resource.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// A client, root directory, file, staged version or link is missing.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// The key that was missing.
        key: String,
    },

    /// A share link has no redemptions left.
    #[error("share link exhausted: {0}")]
    Exhausted(String),

    /// The root directory path is registered by another client.
    #[error("root directory {after_path} is owned by {owner}")]
    RootDirOwned {
        /// Path of the root directory.
        after_path: String,
        /// Current owner.
        owner: String,
    },

    /// Conflict resolution was requested for a path without an open conflict.
    #[error("no open conflict on {0}")]
    NoOpenConflict(String),

    /// A transaction arrived before the connection registered.
    #[error("transaction {0} received before registration")]
    NotRegistered(String),

    /// No handler is registered for the transaction name.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    /// The connection is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Stream or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed message.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Persistence failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        ServerError::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotAuthorized(_)
                | ServerError::NotFound { .. }
                | ServerError::Exhausted(_)
                | ServerError::RootDirOwned { .. }
                | ServerError::NoOpenConflict(_)
                | ServerError::NotRegistered(_)
                | ServerError::UnknownTransaction(_)
                | ServerError::Codec(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::ConnectionClosed
                | ServerError::Transport(_)
                | ServerError::Storage(_)
                | ServerError::Internal(_)
        )
    }
}
