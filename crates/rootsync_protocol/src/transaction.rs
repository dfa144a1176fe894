//! Transaction names.
//!
//! Every exchange on a client connection is a named transaction with its
//! own message stream. The first transaction on a new connection must be
//! [`REGISTER_CLIENT`].

/// Registers (or re-registers) a client and binds the connection to it.
pub const REGISTER_CLIENT: &str = "REGISTERCLIENT";

/// Registers a root directory owned by the calling client.
pub const REGISTER_ROOT_DIR: &str = "REGISTERROOTDIR";

/// Joins a password-protected root directory owned by another client.
pub const JOIN_ROOT_DIR: &str = "JOINROOTDIR";

/// Submits a new file state.
pub const PUSH_FILE: &str = "PUSHFILE";

/// Resolves an open conflict.
pub const RESOLVE_CONFLICT: &str = "RESOLVECONFLICT";

/// Lists the history of a file.
pub const FILE_HISTORY: &str = "FILEHISTORY";

/// Creates a share link for a file.
pub const SHARE_FILE: &str = "SHAREFILE";

/// Deletes a share link.
pub const STOP_SHARING: &str = "STOPSHARING";

/// Server-initiated notification about a file change.
pub const NOTIFY_SYNC: &str = "NOTIFYSYNC";

/// Returns true for the transaction that must open every connection.
pub fn is_initial(name: &str) -> bool {
    name == REGISTER_CLIENT
}
