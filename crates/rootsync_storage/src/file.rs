//! File-based key-value store for persistent storage.
//!
//! Directory layout:
//!
//! ```text
//! <dir>/
//! ├─ LOCK        # Advisory lock for single-writer
//! └─ store.log   # Append-only log of put/delete records
//! ```

use crate::error::{StorageError, StorageResult};
use crate::memory::scan;
use crate::record::{LogRecord, RecordError};
use crate::store::KvStore;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "store.log";
const COMPACT_FILE: &str = "store.log.compact";

/// A durable key-value store backed by an append-only log.
///
/// Every `put` and `delete` appends a checksummed record to the log and
/// syncs it before returning. The full key space is kept in an in-memory
/// ordered index rebuilt from the log on [`FileStore::open`].
///
/// # Recovery
///
/// A record cut short by a crash at the end of the log is discarded and the
/// log truncated to the last complete record. Truncation only happens when
/// the torn record's header is intact and its declared length runs past the
/// end of the log. A record with a bad magic, header checksum or body
/// checksum is reported as [`StorageError::Corrupted`] and the log is left
/// untouched.
///
/// [`FileStore::open_read_only`] never modifies the log; it takes a shared
/// lock, ignores a torn tail and rejects writes with
/// [`StorageError::ReadOnly`].
///
/// # Thread Safety
///
/// The store is `Send + Sync`. Writers are serialized on the log file;
/// readers only take the index lock.
///
/// # Example
///
/// ```no_run
/// use rootsync_storage::{FileStore, KvStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("data")).unwrap();
/// store.put(b"client/abc", b"...").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    log: Mutex<File>,
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    read_only: bool,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory or log cannot be created
    /// - Another process holds the store (returns `Locked`)
    /// - The log contains a corrupted record
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(dir.to_path_buf()));
        }

        let mut log = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(dir.join(LOG_FILE))?;

        let mut contents = Vec::new();
        log.read_to_end(&mut contents)?;
        let (index, valid_len) = replay(&contents)?;

        if valid_len < contents.len() {
            tracing::warn!(
                dir = %dir.display(),
                discarded = contents.len() - valid_len,
                "truncating incomplete record at end of store log"
            );
            log.set_len(valid_len as u64)?;
            log.sync_all()?;
        }

        tracing::debug!(dir = %dir.display(), keys = index.len(), "opened file store");

        Ok(Self {
            dir: dir.to_path_buf(),
            log: Mutex::new(log),
            index: RwLock::new(index),
            read_only: false,
            _lock_file: lock_file,
        })
    }

    /// Opens an existing store in `dir` for inspection.
    ///
    /// Takes a shared lock, so it coexists with other readers but not with a
    /// writer. A torn record at the end of the log is skipped in memory and
    /// left on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory, lock file or log does not exist
    /// - A writer holds the store (returns `Locked`)
    /// - The log contains a corrupted record
    pub fn open_read_only(dir: &Path) -> StorageResult<Self> {
        let lock_file = File::open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_shared().is_err() {
            return Err(StorageError::Locked(dir.to_path_buf()));
        }

        let mut log = File::open(dir.join(LOG_FILE))?;
        let mut contents = Vec::new();
        log.read_to_end(&mut contents)?;
        let (index, valid_len) = replay(&contents)?;

        if valid_len < contents.len() {
            tracing::warn!(
                dir = %dir.display(),
                ignored = contents.len() - valid_len,
                "ignoring incomplete record at end of store log"
            );
        }

        tracing::debug!(dir = %dir.display(), keys = index.len(), "opened file store read-only");

        Ok(Self {
            dir: dir.to_path_buf(),
            log: Mutex::new(log),
            index: RwLock::new(index),
            read_only: true,
            _lock_file: lock_file,
        })
    }

    /// Returns true if the store was opened with [`FileStore::open_read_only`].
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Rewrites the log so it holds exactly one record per live key.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written or swapped in,
    /// or `ReadOnly` if the store was opened read-only.
    pub fn compact(&self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let mut log = self.log.lock();
        let index = self.index.read();

        let compact_path = self.dir.join(COMPACT_FILE);
        {
            let mut out = File::create(&compact_path)?;
            for (key, value) in index.iter() {
                let record = LogRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                };
                out.write_all(&record.encode())?;
            }
            out.sync_all()?;
        }

        let log_path = self.dir.join(LOG_FILE);
        fs::rename(&compact_path, &log_path)?;
        *log = OpenOptions::new().read(true).append(true).open(&log_path)?;

        tracing::debug!(keys = index.len(), "compacted store log");
        Ok(())
    }

    fn append(&self, record: &LogRecord) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let mut log = self.log.lock();
        log.write_all(&record.encode())?;
        log.sync_data()?;

        let mut index = self.index.write();
        match record {
            LogRecord::Put { key, value } => {
                index.insert(key.clone(), value.clone());
            }
            LogRecord::Delete { key } => {
                index.remove(key);
            }
        }
        Ok(())
    }
}

/// Rebuilds the index from raw log bytes.
///
/// Returns the index and the length of the valid prefix of the log.
fn replay(contents: &[u8]) -> StorageResult<(BTreeMap<Vec<u8>, Vec<u8>>, usize)> {
    let mut index = BTreeMap::new();
    let mut offset = 0;

    while offset < contents.len() {
        match LogRecord::decode(&contents[offset..]) {
            Ok((record, used)) => {
                match record {
                    LogRecord::Put { key, value } => {
                        index.insert(key, value);
                    }
                    LogRecord::Delete { key } => {
                        index.remove(&key);
                    }
                }
                offset += used;
            }
            Err(RecordError::Truncated) => break,
            Err(RecordError::Invalid(reason)) => {
                return Err(StorageError::Corrupted {
                    offset: offset as u64,
                    reason,
                });
            }
        }
    }

    Ok((index, offset))
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.index.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.append(&LogRecord::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn delete(&self, key: &[u8]) -> StorageResult<bool> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        if !self.index.read().contains_key(key) {
            return Ok(false);
        }
        self.append(&LogRecord::Delete { key: key.to_vec() })?;
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(scan(&self.index.read(), prefix))
    }

    fn flush(&self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.log.lock().sync_all()?;
        Ok(())
    }
}
