//! Bounded-use share links.

use crate::error::{ServerError, ServerResult};
use crate::locks::KeyedLocks;
use crate::repository::Repository;
use rootsync_protocol::{File, Sharing};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Creates and redeems share links.
pub struct SharingService {
    repository: Arc<Repository>,
    links: KeyedLocks,
    max_share_count: u64,
}

impl SharingService {
    /// Creates the service. Links allow at most `max_share_count` downloads.
    pub fn new(repository: Arc<Repository>, max_share_count: u64) -> Self {
        Self {
            repository,
            links: KeyedLocks::new(),
            max_share_count,
        }
    }

    /// Creates a link to the current state of `after_path`.
    pub fn create_link(
        &self,
        client_uuid: &str,
        after_path: &str,
        max_count: u64,
    ) -> ServerResult<Sharing> {
        if max_count == 0 || max_count > self.max_share_count {
            return Err(ServerError::InvalidRequest(format!(
                "max_count must be between 1 and {}, got {max_count}",
                self.max_share_count
            )));
        }
        let file = self
            .repository
            .file(after_path)?
            .ok_or_else(|| ServerError::not_found("file", after_path))?;
        self.repository
            .authorized_root(client_uuid, &file.root_dir_key)?;

        let sharing = Sharing {
            link: Uuid::new_v4().simple().to_string(),
            count: 0,
            max_count,
            owner: client_uuid.to_string(),
            file,
        };
        self.repository.put_sharing(&sharing)?;
        info!(
            client = %client_uuid,
            path = %after_path,
            link = %sharing.link,
            max_count,
            "share link created"
        );
        Ok(sharing)
    }

    /// Redeems one download and returns the shared file.
    ///
    /// The check and the increment happen under the link's lock, so a link
    /// is never redeemed more than `max_count` times.
    pub fn redeem(&self, link: &str) -> ServerResult<File> {
        let _guard = self.links.lock(link);
        let mut sharing = self.get(link)?;
        if sharing.is_exhausted() {
            return Err(ServerError::Exhausted(link.to_string()));
        }
        sharing.count += 1;
        self.repository.put_sharing(&sharing)?;
        debug!(
            link = %link,
            count = sharing.count,
            max_count = sharing.max_count,
            "share link redeemed"
        );
        Ok(sharing.file)
    }

    /// Returns a link without redeeming it.
    pub fn get(&self, link: &str) -> ServerResult<Sharing> {
        self.repository
            .sharing(link)?
            .ok_or_else(|| ServerError::not_found("share link", link))
    }

    /// Deletes a link. Only its owner may do so. Returns false if the link
    /// did not exist.
    pub fn stop_sharing(&self, client_uuid: &str, link: &str) -> ServerResult<bool> {
        let _guard = self.links.lock(link);
        match self.repository.sharing(link)? {
            None => Ok(false),
            Some(sharing) if sharing.owner != client_uuid => Err(ServerError::NotAuthorized(
                format!("share link {link} belongs to {}", sharing.owner),
            )),
            Some(_) => {
                let removed = self.repository.delete_sharing(link)?;
                info!(client = %client_uuid, link = %link, "share link removed");
                Ok(removed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootsync_protocol::RootDirectory;
    use rootsync_storage::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service(max: u64) -> SharingService {
        let repository = Arc::new(Repository::new(Arc::new(InMemoryStore::new())));
        repository
            .put_root_dir(&RootDirectory {
                after_path: "/r".into(),
                owner: "c1".into(),
                uuids: vec!["c1".into(), "c2".into()],
                ..RootDirectory::default()
            })
            .unwrap();
        repository
            .put_file(&File {
                after_path: "/r/a".into(),
                root_dir_key: "/r".into(),
                latest_hash: "h1".into(),
                ..File::default()
            })
            .unwrap();
        SharingService::new(repository, max)
    }

    #[test]
    fn create_and_redeem() {
        let service = service(10);
        let sharing = service.create_link("c1", "/r/a", 2).unwrap();
        assert_eq!(sharing.link.len(), 32);
        assert_eq!(sharing.count, 0);

        assert_eq!(service.redeem(&sharing.link).unwrap().latest_hash, "h1");
        service.redeem(&sharing.link).unwrap();
        assert!(matches!(
            service.redeem(&sharing.link),
            Err(ServerError::Exhausted(_))
        ));

        let stored = service.get(&sharing.link).unwrap();
        assert_eq!(stored.count, 2);
        assert!(stored.is_exhausted());
    }

    #[test]
    fn create_validation() {
        let service = service(10);
        assert!(matches!(
            service.create_link("c1", "/r/a", 0),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.create_link("c1", "/r/a", 11),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.create_link("c1", "/r/missing", 1),
            Err(ServerError::NotFound { .. })
        ));
        assert!(matches!(
            service.create_link("stranger", "/r/a", 1),
            Err(ServerError::NotAuthorized(_))
        ));
    }

    #[test]
    fn unknown_link() {
        let service = service(10);
        assert!(matches!(
            service.redeem("nope"),
            Err(ServerError::NotFound { .. })
        ));
    }

    #[test]
    fn concurrent_redemptions_respect_limit() {
        let service = Arc::new(service(100));
        let link = service.create_link("c1", "/r/a", 5).unwrap().link;
        let successes = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..20 {
                let service = Arc::clone(&service);
                let successes = Arc::clone(&successes);
                let link = link.clone();
                scope.spawn(move || {
                    if service.redeem(&link).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 5);
        assert_eq!(service.get(&link).unwrap().count, 5);
    }

    #[test]
    fn only_owner_stops_sharing() {
        let service = service(10);
        let link = service.create_link("c1", "/r/a", 1).unwrap().link;
        assert!(matches!(
            service.stop_sharing("c2", &link),
            Err(ServerError::NotAuthorized(_))
        ));
        assert!(service.stop_sharing("c1", &link).unwrap());
        assert!(!service.stop_sharing("c1", &link).unwrap());
    }
}
