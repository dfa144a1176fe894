//! Persisted entities.
//!
//! Paths come in two flavours:
//! - `before_path`: the client-local path before mapping into a root directory
//! - `after_path`: the canonical server-side path (`/rootDir/...`), used as key

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered client (one device).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Client identity (key).
    pub uuid: String,
    /// Numeric id assigned at first registration.
    pub id: u64,
    /// Last known network address.
    pub ip: String,
    /// Root directories this client syncs.
    pub root: Vec<RootDirectory>,
}

impl Client {
    /// Creates a client with no root directories.
    pub fn new(uuid: impl Into<String>, id: u64, ip: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            id,
            ip: ip.into(),
            root: Vec::new(),
        }
    }

    /// Records `root` in this client's list, replacing an entry with the
    /// same after path.
    pub fn upsert_root(&mut self, root: RootDirectory) {
        match self
            .root
            .iter_mut()
            .find(|existing| existing.after_path == root.after_path)
        {
            Some(existing) => *existing = root,
            None => self.root.push(root),
        }
    }
}

/// A root directory shared between one owner and any joined clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDirectory {
    /// Server-side path (key).
    pub after_path: String,
    /// Path on the owner's machine.
    pub before_path: String,
    /// UUID of the owning client.
    pub owner: String,
    /// Secret other clients present to join. Empty means joining is disabled.
    pub password: String,
    /// Clients allowed to sync into this directory, owner included.
    pub uuids: Vec<String>,
}

impl RootDirectory {
    /// Returns true if `uuid` may sync files under this root.
    pub fn is_authorized(&self, uuid: &str) -> bool {
        self.uuids.iter().any(|u| u == uuid)
    }

    /// Adds `uuid` to the authorized set. Returns false if already present.
    pub fn authorize(&mut self, uuid: &str) -> bool {
        if self.is_authorized(uuid) {
            return false;
        }
        self.uuids.push(uuid.to_string());
        true
    }
}

/// The server's authoritative view of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Path within the root directory (key).
    pub after_path: String,
    /// Client-local path of the last accepted version.
    pub before_path: String,
    /// After path of the owning root directory.
    pub root_dir_key: String,
    /// Content hash of the accepted version.
    pub latest_hash: String,
    /// Server timestamp (millis) at which the latest version was accepted.
    pub latest_sync_timestamp: u64,
    /// UUID of the client that produced the latest version.
    pub latest_edit_client: String,
    /// Whether the file had contents (false for deletions and directories).
    pub contents_existed: bool,
    /// Set while a conflict is open; clients must force-sync after resolution.
    pub need_force_sync: bool,
    /// Versions competing to become the latest.
    pub conflict: Conflict,
    /// Attributes of the latest version.
    pub metadata: FileMetadata,
}

impl File {
    /// Returns true if this file has unresolved staged versions.
    pub fn has_open_conflict(&self) -> bool {
        self.conflict.is_open()
    }
}

/// One accepted version of a file. Never modified once written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistory {
    /// Path of the file.
    pub after_path: String,
    /// Client-local path at the time of the edit.
    pub before_path: String,
    /// Human readable UTC date of `timestamp`.
    pub date: String,
    /// Client that produced this version.
    pub uuid: String,
    /// Server timestamp (millis).
    pub timestamp: u64,
    /// Content hash.
    pub hash: String,
    /// File attributes at this version.
    pub file: FileMetadata,
}

/// OS-level file attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Base name.
    pub name: String,
    /// Size in bytes.
    pub size: i64,
    /// Permission and type bits.
    pub mode: u32,
    /// Modification time, seconds since the Unix epoch.
    pub mod_time_secs: i64,
    /// Sub-second part of the modification time.
    pub mod_time_nanos: u32,
    /// Whether this is a directory.
    pub is_dir: bool,
}

/// Staged versions of one path that have not been reconciled yet.
///
/// Staged versions are keyed by content hash, so two clients submitting the
/// same bytes share one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Path of the file.
    pub after_path: String,
    /// Staging key -> staged version.
    pub staging_files: BTreeMap<String, FileHistory>,
}

impl Conflict {
    /// Creates an empty (closed) conflict for `after_path`.
    pub fn new(after_path: impl Into<String>) -> Self {
        Self {
            after_path: after_path.into(),
            staging_files: BTreeMap::new(),
        }
    }

    /// Returns true while any version is staged.
    pub fn is_open(&self) -> bool {
        !self.staging_files.is_empty()
    }

    /// Stages a version under its hash. Returns false if that hash was
    /// already staged; the earlier entry is kept.
    pub fn stage(&mut self, version: FileHistory) -> bool {
        if self.staging_files.contains_key(&version.hash) {
            return false;
        }
        self.staging_files.insert(version.hash.clone(), version);
        true
    }

    /// Returns the staging keys in order.
    pub fn staged_keys(&self) -> Vec<String> {
        self.staging_files.keys().cloned().collect()
    }

    /// Drops every staged version.
    pub fn clear(&mut self) {
        self.staging_files.clear();
    }
}

/// A bounded-use public download link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sharing {
    /// Link token (key).
    pub link: String,
    /// Successful redemptions so far.
    pub count: u64,
    /// Redemption limit.
    pub max_count: u64,
    /// UUID of the client that created the link.
    pub owner: String,
    /// File state when the link was created.
    pub file: File,
}

impl Sharing {
    /// Returns true once no redemptions are left.
    pub fn is_exhausted(&self) -> bool {
        self.count >= self.max_count
    }

    /// Returns the number of redemptions left.
    pub fn remaining(&self) -> u64 {
        self.max_count.saturating_sub(self.count)
    }
}

cbor_record!(
    Client,
    RootDirectory,
    File,
    FileHistory,
    FileMetadata,
    Conflict,
    Sharing,
);
