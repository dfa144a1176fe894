//! Protocol messages exchanged inside transactions.

use crate::types::{File, FileHistory, FileMetadata, RootDirectory};
use serde::{Deserialize, Serialize};

/// First message of every connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegisterRequest {
    /// Identity the client already holds. Empty asks the server to assign one.
    pub uuid: String,
    /// Server-wide password, if the server requires one.
    pub server_password: String,
}

impl ClientRegisterRequest {
    /// Creates a registration request for a known identity.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            server_password: String::new(),
        }
    }

    /// Sets the server password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.server_password = password.into();
        self
    }
}

/// Reply to [`ClientRegisterRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegisterResponse {
    /// Confirmed (or newly assigned) identity.
    pub uuid: String,
    /// Numeric client id.
    pub id: u64,
}

/// Registers a root directory. Also the JSON body of `POST /{clientId}/roots`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDirRegisterRequest {
    /// Path on the client.
    pub before_path: String,
    /// Server-side path.
    pub after_path: String,
    /// Join password for other clients. Empty disables joining.
    #[serde(default)]
    pub password: String,
}

/// Joins another client's root directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDirJoinRequest {
    /// Server-side path of the root directory.
    pub after_path: String,
    /// Join password.
    pub password: String,
}

/// Public view of a root directory. The password is never sent back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDirResponse {
    /// Server-side path.
    pub after_path: String,
    /// Path on the owner's machine.
    pub before_path: String,
    /// Owning client.
    pub owner: String,
    /// Clients allowed to sync.
    pub authorized: Vec<String>,
}

impl From<&RootDirectory> for RootDirResponse {
    fn from(root: &RootDirectory) -> Self {
        Self {
            after_path: root.after_path.clone(),
            before_path: root.before_path.clone(),
            owner: root.owner.clone(),
            authorized: root.uuids.clone(),
        }
    }
}

/// A client's new state for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFileRequest {
    /// Server-side path of the file.
    pub after_path: String,
    /// Client-local path.
    pub before_path: String,
    /// After path of the root directory holding the file.
    pub root_dir_key: String,
    /// Latest hash this client saw from the server before editing.
    /// Empty for a file the client believes is new.
    pub last_hash: String,
    /// Hash of the submitted contents.
    pub hash: String,
    /// Whether the file has contents.
    pub contents_existed: bool,
    /// Attributes of the submitted version.
    pub metadata: FileMetadata,
}

/// What the server did with a pushed file state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushOutcome {
    /// The version is now the latest.
    Accepted,
    /// The version diverged from the latest; a conflict was opened.
    ConflictOpened,
    /// A conflict was already open; the version was added to it.
    ConflictAppended,
}

impl PushOutcome {
    /// Returns true when the client must present a conflict.
    pub fn is_conflict(&self) -> bool {
        !matches!(self, PushOutcome::Accepted)
    }
}

/// Reply to [`PushFileRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFileResponse {
    /// Outcome of the push.
    pub outcome: PushOutcome,
    /// The accepted latest hash after the push.
    pub latest_hash: String,
    /// Staging keys of the open conflict (empty when accepted).
    pub staged_keys: Vec<String>,
}

/// How to settle an open conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Promote one staged version.
    Staged {
        /// Staging key of the chosen version.
        key: String,
    },
    /// Promote a version merged by the client.
    Merged {
        /// Hash of the merged contents.
        hash: String,
        /// Attributes of the merged version.
        metadata: FileMetadata,
    },
}

/// Resolves the conflict on one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveConflictRequest {
    /// Path of the conflicted file.
    pub after_path: String,
    /// Chosen resolution.
    pub resolution: Resolution,
}

/// Reply to [`ResolveConflictRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveConflictResponse {
    /// The new latest hash.
    pub latest_hash: String,
    /// Server timestamp of the resolution.
    pub latest_sync_timestamp: u64,
}

/// Requests the history of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistoryRequest {
    /// Path of the file.
    pub after_path: String,
}

/// Reply to [`FileHistoryRequest`], oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistoryResponse {
    /// History entries.
    pub entries: Vec<FileHistory>,
}

/// Creates a share link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    /// Path of the file to share.
    pub after_path: String,
    /// Number of downloads allowed.
    pub max_count: u64,
}

/// Reply to [`ShareRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareResponse {
    /// Link token.
    pub link: String,
    /// Number of downloads allowed.
    pub max_count: u64,
}

/// Deletes a share link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSharingRequest {
    /// Link token.
    pub link: String,
}

/// Reply to [`StopSharingRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSharingResponse {
    /// Whether the link existed.
    pub removed: bool,
}

/// Kind of change announced to other clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// A new version was accepted.
    FileUpdated,
    /// The path has an open conflict.
    ConflictOpened,
    /// A conflict was resolved; clients must force-sync.
    ConflictResolved,
}

/// Server push sent on a [`crate::transaction::NOTIFY_SYNC`] transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncNotification {
    /// What happened.
    pub kind: NotificationKind,
    /// Path of the file.
    pub after_path: String,
    /// Root directory of the file.
    pub root_dir_key: String,
    /// Latest accepted hash.
    pub latest_hash: String,
    /// Client whose action caused the notification.
    pub edit_client: String,
    /// Server timestamp of the change.
    pub timestamp: u64,
}

impl SyncNotification {
    /// Builds a notification describing the current state of `file`.
    pub fn for_file(kind: NotificationKind, file: &File, edit_client: impl Into<String>) -> Self {
        Self {
            kind,
            after_path: file.after_path.clone(),
            root_dir_key: file.root_dir_key.clone(),
            latest_hash: file.latest_hash.clone(),
            edit_client: edit_client.into(),
            timestamp: file.latest_sync_timestamp,
        }
    }
}

cbor_record!(
    ClientRegisterRequest,
    ClientRegisterResponse,
    RootDirRegisterRequest,
    RootDirJoinRequest,
    RootDirResponse,
    PushFileRequest,
    PushFileResponse,
    ResolveConflictRequest,
    ResolveConflictResponse,
    FileHistoryRequest,
    FileHistoryResponse,
    ShareRequest,
    ShareResponse,
    StopSharingRequest,
    StopSharingResponse,
    SyncNotification,
);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rootsync_codec::{Decode, Encode};

    #[test]
    fn register_request_builder() {
        let request = ClientRegisterRequest::new("c1").with_password("secret");
        let decoded = ClientRegisterRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded.uuid, "c1");
        assert_eq!(decoded.server_password, "secret");
    }

    #[test]
    fn resolution_variants_roundtrip() {
        for resolution in [
            Resolution::Staged { key: "h3".into() },
            Resolution::Merged {
                hash: "merged".into(),
                metadata: FileMetadata::default(),
            },
        ] {
            let request = ResolveConflictRequest {
                after_path: "/r/a".into(),
                resolution,
            };
            let bytes = request.encode().unwrap();
            assert_eq!(ResolveConflictRequest::decode(&bytes).unwrap(), request);
        }
    }

    #[test]
    fn push_response_carries_outcome() {
        let response = PushFileResponse {
            outcome: PushOutcome::ConflictAppended,
            latest_hash: "h1".into(),
            staged_keys: vec!["h1".into(), "h2".into()],
        };
        let decoded = PushFileResponse::decode(&response.encode().unwrap()).unwrap();
        assert!(decoded.outcome.is_conflict());
        assert_eq!(decoded, response);
        assert!(!PushOutcome::Accepted.is_conflict());
    }

    #[test]
    fn root_response_hides_password() {
        let root = RootDirectory {
            after_path: "/r".into(),
            before_path: "/home/r".into(),
            owner: "c1".into(),
            password: "secret".into(),
            uuids: vec!["c1".into()],
        };
        let response = RootDirResponse::from(&root);
        let bytes = response.encode().unwrap();
        assert!(!bytes.windows(6).any(|w| w == b"secret"));
        assert_eq!(response.authorized, vec!["c1".to_string()]);
    }

    #[test]
    fn notification_from_file() {
        let file = File {
            after_path: "/r/a".into(),
            root_dir_key: "/r".into(),
            latest_hash: "h9".into(),
            latest_sync_timestamp: 42,
            ..File::default()
        };
        let note = SyncNotification::for_file(NotificationKind::FileUpdated, &file, "c2");
        assert_eq!(note.latest_hash, "h9");
        assert_eq!(note.timestamp, 42);
        let decoded = SyncNotification::decode(&note.encode().unwrap()).unwrap();
        assert_eq!(decoded, note);
    }

    #[test]
    fn garbage_request_fails() {
        assert!(PushFileRequest::decode(&[0xff, 0x00, 0x13]).is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = PushFileRequest::decode(&bytes);
            let _ = ResolveConflictRequest::decode(&bytes);
            let _ = ClientRegisterRequest::decode(&bytes);
        }
    }
}
