//! CLI command implementations.

pub mod compact;
pub mod history;
pub mod inspect;
pub mod serve;
pub mod share_info;

use rootsync_server::Repository;
use rootsync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;

/// Opens the store at `path` read-only for offline inspection.
///
/// Fails while a server holds the store's lock. The log is never modified,
/// not even to drop a torn tail.
pub(crate) fn open_repository(path: &Path) -> Result<Repository, Box<dyn std::error::Error>> {
    if !path.join("store.log").exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let store = FileStore::open_read_only(path)?;
    Ok(Repository::new(Arc::new(store)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootsync_protocol::Client;

    #[test]
    fn missing_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_repository(dir.path()).is_err());
    }

    #[test]
    fn opens_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repository = Repository::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            repository.put_client(&Client::new("c1", 1, "a")).unwrap();
        }
        let repository = open_repository(dir.path()).unwrap();
        assert_eq!(repository.clients().unwrap().len(), 1);
    }

    #[test]
    fn inspection_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        drop(FileStore::open(dir.path()).unwrap());

        let repository = open_repository(dir.path()).unwrap();
        assert!(repository.put_client(&Client::new("c1", 1, "a")).is_err());
        assert_eq!(std::fs::metadata(dir.path().join("store.log")).unwrap().len(), 0);
    }
}
