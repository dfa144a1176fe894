//! Typed access to persisted records.
//!
//! Key layout (UTF-8 strings as bytes):
//!
//! | Record | Key |
//! |---|---|
//! | Client | `client/{uuid}` |
//! | RootDirectory | `root/{after_path}` |
//! | File | `file/{after_path}` |
//! | FileHistory | `history/{after_path}\0{timestamp:020}` |
//! | Sharing | `sharing/{link}` |
//! | client id sequence | `meta/client_seq` |
//!
//! History keys sort by timestamp within one path, and the NUL separator
//! keeps one path's entries from matching a longer path's prefix.

use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use rootsync_protocol::{Client, Decode, Encode, File, FileHistory, RootDirectory, Sharing};
use rootsync_storage::KvStore;
use std::sync::Arc;

const CLIENT_PREFIX: &str = "client/";
const ROOT_PREFIX: &str = "root/";
const FILE_PREFIX: &str = "file/";
const HISTORY_PREFIX: &str = "history/";
const SHARING_PREFIX: &str = "sharing/";
const CLIENT_SEQ_KEY: &str = "meta/client_seq";

/// Store adapter for the server's entities.
pub struct Repository {
    store: Arc<dyn KvStore>,
    sequence: Mutex<()>,
}

impl Repository {
    /// Wraps a key-value store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            sequence: Mutex::new(()),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Flushes pending writes.
    pub fn flush(&self) -> ServerResult<()> {
        Ok(self.store.flush()?)
    }

    fn load<T: Decode>(&self, key: &str) -> ServerResult<Option<T>> {
        match self.store.get(key.as_bytes())? {
            Some(bytes) => T::decode(&bytes)
                .map(Some)
                .map_err(|e| ServerError::Internal(format!("corrupt record {key}: {e}"))),
            None => Ok(None),
        }
    }

    fn save<T: Encode>(&self, key: &str, value: &T) -> ServerResult<()> {
        let bytes = value
            .encode()
            .map_err(|e| ServerError::Internal(format!("cannot encode {key}: {e}")))?;
        self.store.put(key.as_bytes(), &bytes)?;
        Ok(())
    }

    fn scan<T: Decode>(&self, prefix: &str) -> ServerResult<Vec<T>> {
        self.store
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .map(|(key, bytes)| {
                T::decode(&bytes).map_err(|e| {
                    ServerError::Internal(format!(
                        "corrupt record {}: {e}",
                        String::from_utf8_lossy(&key)
                    ))
                })
            })
            .collect()
    }

    /// Loads a client.
    pub fn client(&self, uuid: &str) -> ServerResult<Option<Client>> {
        self.load(&format!("{CLIENT_PREFIX}{uuid}"))
    }

    /// Stores a client.
    pub fn put_client(&self, client: &Client) -> ServerResult<()> {
        self.save(&format!("{CLIENT_PREFIX}{}", client.uuid), client)
    }

    /// Loads every client, ordered by uuid.
    pub fn clients(&self) -> ServerResult<Vec<Client>> {
        self.scan(CLIENT_PREFIX)
    }

    /// Allocates the next numeric client id, starting at 1.
    pub fn next_client_id(&self) -> ServerResult<u64> {
        let _guard = self.sequence.lock();
        let current = match self.store.get(CLIENT_SEQ_KEY.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    ServerError::Internal(format!("corrupt client sequence ({} bytes)", bytes.len()))
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.store
            .put(CLIENT_SEQ_KEY.as_bytes(), &next.to_be_bytes())?;
        Ok(next)
    }

    /// Loads a root directory.
    pub fn root_dir(&self, after_path: &str) -> ServerResult<Option<RootDirectory>> {
        self.load(&format!("{ROOT_PREFIX}{after_path}"))
    }

    /// Stores a root directory.
    pub fn put_root_dir(&self, root: &RootDirectory) -> ServerResult<()> {
        self.save(&format!("{ROOT_PREFIX}{}", root.after_path), root)
    }

    /// Loads every root directory, ordered by path.
    pub fn root_dirs(&self) -> ServerResult<Vec<RootDirectory>> {
        self.scan(ROOT_PREFIX)
    }

    /// Loads `root_dir_key` and checks that `client_uuid` may sync into it.
    pub fn authorized_root(
        &self,
        client_uuid: &str,
        root_dir_key: &str,
    ) -> ServerResult<RootDirectory> {
        let root = self
            .root_dir(root_dir_key)?
            .ok_or_else(|| ServerError::not_found("root directory", root_dir_key))?;
        if !root.is_authorized(client_uuid) {
            return Err(ServerError::NotAuthorized(format!(
                "client {client_uuid} is not a member of {root_dir_key}"
            )));
        }
        Ok(root)
    }

    /// Loads a file.
    pub fn file(&self, after_path: &str) -> ServerResult<Option<File>> {
        self.load(&format!("{FILE_PREFIX}{after_path}"))
    }

    /// Stores a file.
    pub fn put_file(&self, file: &File) -> ServerResult<()> {
        self.save(&format!("{FILE_PREFIX}{}", file.after_path), file)
    }

    /// Loads every file, ordered by path.
    pub fn files(&self) -> ServerResult<Vec<File>> {
        self.scan(FILE_PREFIX)
    }

    /// Appends a history entry. Entries are never rewritten.
    pub fn append_history(&self, entry: &FileHistory) -> ServerResult<()> {
        let key = history_key(&entry.after_path, entry.timestamp);
        if self.store.get(key.as_bytes())?.is_some() {
            return Err(ServerError::Internal(format!(
                "history entry {} at {} already exists",
                entry.after_path, entry.timestamp
            )));
        }
        self.save(&key, entry)
    }

    /// Loads the history of one path, oldest first.
    pub fn history(&self, after_path: &str) -> ServerResult<Vec<FileHistory>> {
        self.scan(&format!("{HISTORY_PREFIX}{after_path}\0"))
    }

    /// Loads a share link.
    pub fn sharing(&self, link: &str) -> ServerResult<Option<Sharing>> {
        self.load(&format!("{SHARING_PREFIX}{link}"))
    }

    /// Stores a share link.
    pub fn put_sharing(&self, sharing: &Sharing) -> ServerResult<()> {
        self.save(&format!("{SHARING_PREFIX}{}", sharing.link), sharing)
    }

    /// Deletes a share link. Returns true if it existed.
    pub fn delete_sharing(&self, link: &str) -> ServerResult<bool> {
        Ok(self
            .store
            .delete(format!("{SHARING_PREFIX}{link}").as_bytes())?)
    }

    /// Loads every share link.
    pub fn sharings(&self) -> ServerResult<Vec<Sharing>> {
        self.scan(SHARING_PREFIX)
    }

    /// Returns the largest server timestamp recorded anywhere.
    pub fn max_sync_timestamp(&self) -> ServerResult<u64> {
        let mut max = 0;
        for file in self.files()? {
            max = max.max(file.latest_sync_timestamp);
            for staged in file.conflict.staging_files.values() {
                max = max.max(staged.timestamp);
            }
        }
        for entry in self.scan::<FileHistory>(HISTORY_PREFIX)? {
            max = max.max(entry.timestamp);
        }
        Ok(max)
    }
}

fn history_key(after_path: &str, timestamp: u64) -> String {
    format!("{HISTORY_PREFIX}{after_path}\0{timestamp:020}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootsync_storage::InMemoryStore;

    fn repository() -> Repository {
        Repository::new(Arc::new(InMemoryStore::new()))
    }

    fn entry(path: &str, timestamp: u64) -> FileHistory {
        FileHistory {
            after_path: path.into(),
            timestamp,
            hash: format!("h{timestamp}"),
            ..FileHistory::default()
        }
    }

    #[test]
    fn client_ids_increase() {
        let repo = repository();
        assert_eq!(repo.next_client_id().unwrap(), 1);
        assert_eq!(repo.next_client_id().unwrap(), 2);
        assert_eq!(repo.next_client_id().unwrap(), 3);
    }

    #[test]
    fn client_roundtrip() {
        let repo = repository();
        assert!(repo.client("c1").unwrap().is_none());
        let client = Client::new("c1", 1, "10.0.0.1");
        repo.put_client(&client).unwrap();
        assert_eq!(repo.client("c1").unwrap(), Some(client));
        assert_eq!(repo.clients().unwrap().len(), 1);
    }

    #[test]
    fn history_is_ordered_and_scoped() {
        let repo = repository();
        repo.append_history(&entry("/r/a", 20)).unwrap();
        repo.append_history(&entry("/r/a", 3)).unwrap();
        repo.append_history(&entry("/r/ab", 5)).unwrap();
        repo.append_history(&entry("/r/a/b", 7)).unwrap();

        let timestamps: Vec<u64> = repo
            .history("/r/a")
            .unwrap()
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(timestamps, vec![3, 20]);
    }

    #[test]
    fn history_entries_are_never_overwritten() {
        let repo = repository();
        repo.append_history(&entry("/r/a", 1)).unwrap();
        let mut again = entry("/r/a", 1);
        again.hash = "other".into();
        assert!(repo.append_history(&again).is_err());
        assert_eq!(repo.history("/r/a").unwrap()[0].hash, "h1");
    }

    #[test]
    fn authorized_root_checks_membership() {
        let repo = repository();
        let root = RootDirectory {
            after_path: "/r".into(),
            owner: "c1".into(),
            uuids: vec!["c1".into()],
            ..RootDirectory::default()
        };
        repo.put_root_dir(&root).unwrap();

        assert!(repo.authorized_root("c1", "/r").is_ok());
        assert!(matches!(
            repo.authorized_root("c2", "/r"),
            Err(ServerError::NotAuthorized(_))
        ));
        assert!(matches!(
            repo.authorized_root("c1", "/missing"),
            Err(ServerError::NotFound { .. })
        ));
    }

    #[test]
    fn corrupt_record_is_internal_error() {
        let store = Arc::new(InMemoryStore::new());
        store.put(b"file//r/a", &[0xff, 0x00]).unwrap();
        let repo = Repository::new(store);
        assert!(matches!(repo.file("/r/a"), Err(ServerError::Internal(_))));
    }

    #[test]
    fn sharing_delete() {
        let repo = repository();
        let sharing = Sharing {
            link: "abc".into(),
            max_count: 2,
            ..Sharing::default()
        };
        repo.put_sharing(&sharing).unwrap();
        assert!(repo.delete_sharing("abc").unwrap());
        assert!(!repo.delete_sharing("abc").unwrap());
        assert!(repo.sharing("abc").unwrap().is_none());
    }

    #[test]
    fn max_timestamp_covers_files_and_history() {
        let repo = repository();
        assert_eq!(repo.max_sync_timestamp().unwrap(), 0);
        repo.append_history(&entry("/r/a", 40)).unwrap();
        let file = File {
            after_path: "/r/a".into(),
            latest_sync_timestamp: 12,
            ..File::default()
        };
        repo.put_file(&file).unwrap();
        assert_eq!(repo.max_sync_timestamp().unwrap(), 40);
    }
}
