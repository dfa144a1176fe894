//! File state submission and conflict resolution.
//!
//! A pushed version is either accepted as the new latest state of its
//! path or staged in the path's conflict. Staged versions are kept until
//! a client resolves the conflict explicitly; nothing is discarded
//! automatically.

use crate::clock::{format_timestamp, MonotonicClock};
use crate::error::{ServerError, ServerResult};
use crate::locks::KeyedLocks;
use crate::repository::Repository;
use rootsync_protocol::{
    Conflict, File, FileHistory, PushFileRequest, PushOutcome, Resolution,
    ResolveConflictRequest,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of [`SyncEngine::submit_file_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// What happened to the pushed version.
    pub outcome: PushOutcome,
    /// False when the push repeated state the server already held.
    pub changed: bool,
    /// File state after the push.
    pub file: File,
}

/// Decides between accepting and staging pushed versions.
pub struct SyncEngine {
    repository: Arc<Repository>,
    clock: Arc<MonotonicClock>,
    paths: KeyedLocks,
}

impl SyncEngine {
    /// Creates the engine.
    pub fn new(repository: Arc<Repository>, clock: Arc<MonotonicClock>) -> Self {
        Self {
            repository,
            clock,
            paths: KeyedLocks::new(),
        }
    }

    /// Submits a client's new state for one file.
    ///
    /// Decisions for one path are made under that path's lock:
    /// - unknown path: the file is created and its first history entry written
    /// - open conflict: the version joins the staged versions
    /// - same hash as the latest: nothing changes
    /// - `last_hash` equals the latest: forward edit, accepted
    /// - otherwise: a conflict opens holding the latest and the pushed version
    pub fn submit_file_state(
        &self,
        client_uuid: &str,
        request: &PushFileRequest,
    ) -> ServerResult<Submission> {
        validate_push(request)?;
        self.repository
            .authorized_root(client_uuid, &request.root_dir_key)?;

        let _guard = self.paths.lock(&request.after_path);
        let Some(mut file) = self.repository.file(&request.after_path)? else {
            let version = self.version(client_uuid, request);
            let file = File {
                after_path: request.after_path.clone(),
                before_path: request.before_path.clone(),
                root_dir_key: request.root_dir_key.clone(),
                latest_hash: request.hash.clone(),
                latest_sync_timestamp: version.timestamp,
                latest_edit_client: client_uuid.to_string(),
                contents_existed: request.contents_existed,
                need_force_sync: false,
                conflict: Conflict::new(request.after_path.clone()),
                metadata: request.metadata.clone(),
            };
            self.repository.append_history(&version)?;
            self.repository.put_file(&file)?;
            debug!(client = %client_uuid, path = %file.after_path, "file created");
            return Ok(accepted(file, true));
        };

        if file.root_dir_key != request.root_dir_key {
            return Err(ServerError::InvalidRequest(format!(
                "{} belongs to root directory {}",
                file.after_path, file.root_dir_key
            )));
        }

        if file.has_open_conflict() {
            let staged = file.conflict.stage(self.version(client_uuid, request));
            if staged {
                self.repository.put_file(&file)?;
                info!(
                    client = %client_uuid,
                    path = %file.after_path,
                    staged = file.conflict.staging_files.len(),
                    "version added to open conflict"
                );
            }
            return Ok(Submission {
                outcome: PushOutcome::ConflictAppended,
                changed: staged,
                file,
            });
        }

        if request.hash == file.latest_hash {
            return Ok(accepted(file, false));
        }

        if request.last_hash == file.latest_hash {
            let version = self.version(client_uuid, request);
            file.before_path = version.before_path.clone();
            file.latest_hash = version.hash.clone();
            file.latest_sync_timestamp = version.timestamp;
            file.latest_edit_client = client_uuid.to_string();
            file.contents_existed = request.contents_existed;
            file.metadata = version.file.clone();
            self.repository.append_history(&version)?;
            self.repository.put_file(&file)?;
            debug!(
                client = %client_uuid,
                path = %file.after_path,
                hash = %file.latest_hash,
                "version accepted"
            );
            return Ok(accepted(file, true));
        }

        let latest = latest_version(&file);
        file.conflict.after_path = file.after_path.clone();
        file.conflict.stage(latest);
        file.conflict.stage(self.version(client_uuid, request));
        file.need_force_sync = true;
        self.repository.put_file(&file)?;
        info!(
            client = %client_uuid,
            path = %file.after_path,
            latest = %file.latest_hash,
            incoming = %request.hash,
            "conflict opened"
        );
        Ok(Submission {
            outcome: PushOutcome::ConflictOpened,
            changed: true,
            file,
        })
    }

    /// Settles the open conflict of one path.
    ///
    /// The chosen version becomes the latest state and is appended to the
    /// history; every staged version is dropped.
    pub fn resolve_conflict(
        &self,
        client_uuid: &str,
        request: &ResolveConflictRequest,
    ) -> ServerResult<File> {
        let _guard = self.paths.lock(&request.after_path);
        let mut file = self
            .repository
            .file(&request.after_path)?
            .ok_or_else(|| ServerError::not_found("file", &request.after_path))?;
        self.repository
            .authorized_root(client_uuid, &file.root_dir_key)?;
        if !file.has_open_conflict() {
            return Err(ServerError::NoOpenConflict(file.after_path));
        }

        let mut chosen = match &request.resolution {
            Resolution::Staged { key } => file
                .conflict
                .staging_files
                .get(key)
                .cloned()
                .ok_or_else(|| ServerError::not_found("staged version", key))?,
            Resolution::Merged { hash, metadata } => {
                if hash.is_empty() {
                    return Err(ServerError::InvalidRequest(
                        "merged hash must not be empty".into(),
                    ));
                }
                FileHistory {
                    after_path: file.after_path.clone(),
                    before_path: file.before_path.clone(),
                    uuid: client_uuid.to_string(),
                    hash: hash.clone(),
                    file: metadata.clone(),
                    ..FileHistory::default()
                }
            }
        };
        chosen.timestamp = self.clock.now();
        chosen.date = format_timestamp(chosen.timestamp);

        file.before_path = chosen.before_path.clone();
        file.latest_hash = chosen.hash.clone();
        file.latest_sync_timestamp = chosen.timestamp;
        file.latest_edit_client = chosen.uuid.clone();
        file.metadata = chosen.file.clone();
        file.need_force_sync = false;
        file.conflict.clear();

        self.repository.append_history(&chosen)?;
        self.repository.put_file(&file)?;
        info!(
            client = %client_uuid,
            path = %file.after_path,
            hash = %file.latest_hash,
            "conflict resolved"
        );
        Ok(file)
    }

    /// Returns the history of a file visible to `client_uuid`, oldest first.
    pub fn history(&self, client_uuid: &str, after_path: &str) -> ServerResult<Vec<FileHistory>> {
        let file = self
            .repository
            .file(after_path)?
            .ok_or_else(|| ServerError::not_found("file", after_path))?;
        self.repository
            .authorized_root(client_uuid, &file.root_dir_key)?;
        self.repository.history(after_path)
    }

    /// Returns the stored state of a file.
    pub fn file(&self, after_path: &str) -> ServerResult<Option<File>> {
        self.repository.file(after_path)
    }

    /// Returns the open conflict of a file, if any.
    pub fn conflict(&self, after_path: &str) -> ServerResult<Option<Conflict>> {
        Ok(self
            .repository
            .file(after_path)?
            .map(|file| file.conflict)
            .filter(Conflict::is_open))
    }

    fn version(&self, client_uuid: &str, request: &PushFileRequest) -> FileHistory {
        let timestamp = self.clock.now();
        FileHistory {
            after_path: request.after_path.clone(),
            before_path: request.before_path.clone(),
            date: format_timestamp(timestamp),
            uuid: client_uuid.to_string(),
            timestamp,
            hash: request.hash.clone(),
            file: request.metadata.clone(),
        }
    }
}

fn accepted(file: File, changed: bool) -> Submission {
    Submission {
        outcome: PushOutcome::Accepted,
        changed,
        file,
    }
}

fn latest_version(file: &File) -> FileHistory {
    FileHistory {
        after_path: file.after_path.clone(),
        before_path: file.before_path.clone(),
        date: format_timestamp(file.latest_sync_timestamp),
        uuid: file.latest_edit_client.clone(),
        timestamp: file.latest_sync_timestamp,
        hash: file.latest_hash.clone(),
        file: file.metadata.clone(),
    }
}

fn validate_push(request: &PushFileRequest) -> ServerResult<()> {
    if request.hash.is_empty() {
        return Err(ServerError::InvalidRequest("hash must not be empty".into()));
    }
    if request.after_path.contains('\0') {
        return Err(ServerError::InvalidRequest(
            "after_path must not contain NUL".into(),
        ));
    }
    let root = request.root_dir_key.trim_end_matches('/');
    let within = request
        .after_path
        .strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1);
    if request.root_dir_key.is_empty() || !within {
        return Err(ServerError::InvalidRequest(format!(
            "{:?} is not inside root directory {:?}",
            request.after_path, request.root_dir_key
        )));
    }
    Ok(())
}
