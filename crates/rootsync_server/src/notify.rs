//! Server-initiated sync notifications.

use crate::error::ServerResult;
use crate::pool::{ConnectionHandle, ConnectionPool};
use crate::repository::Repository;
use rootsync_protocol::transaction::NOTIFY_SYNC;
use rootsync_protocol::{Encode, SyncNotification};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Pushes notifications to the connected members of a root directory.
pub struct Notifier {
    pool: Arc<ConnectionPool>,
    repository: Arc<Repository>,
    timeout: Duration,
}

impl Notifier {
    /// Creates a notifier. Each push must finish within `timeout`.
    pub fn new(pool: Arc<ConnectionPool>, repository: Arc<Repository>, timeout: Duration) -> Self {
        Self {
            pool,
            repository,
            timeout,
        }
    }

    /// Notifies every connected member of the file's root directory except
    /// the client that caused the change. Returns the number of clients
    /// reached.
    ///
    /// Failures are logged and never propagated. A connection that turns
    /// out to be closed is evicted from the pool if it is still current.
    pub async fn broadcast(&self, notification: &SyncNotification) -> usize {
        let members = match self.repository.root_dir(&notification.root_dir_key) {
            Ok(Some(root)) => root.uuids,
            Ok(None) => return 0,
            Err(err) => {
                warn!(
                    path = %notification.after_path,
                    error = %err,
                    "cannot load notification recipients"
                );
                return 0;
            }
        };
        let message = match notification.encode() {
            Ok(message) => message,
            Err(err) => {
                warn!(path = %notification.after_path, error = %err, "cannot encode notification");
                return 0;
            }
        };

        let mut delivered = 0;
        for member in members.iter().filter(|m| **m != notification.edit_client) {
            let Ok(connection) = self.pool.lookup(member) else {
                continue;
            };
            let outcome = timeout(self.timeout, push(&connection, message.clone())).await;
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    warn!(
                        client = %member,
                        path = %notification.after_path,
                        error = %err,
                        "notification failed"
                    );
                }
                Err(_) => {
                    warn!(
                        client = %member,
                        path = %notification.after_path,
                        "notification timed out"
                    );
                }
            }
            if connection.is_closed() {
                self.pool.evict_if_current(member, connection.id());
            }
        }
        debug!(
            path = %notification.after_path,
            kind = ?notification.kind,
            delivered,
            "notification sent"
        );
        delivered
    }
}

async fn push(connection: &ConnectionHandle, message: Vec<u8>) -> ServerResult<()> {
    let mut stream = connection.open_transaction(NOTIFY_SYNC).await?;
    stream.send_message(message).await?;
    stream.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryLink;
    use rootsync_protocol::{Decode, NotificationKind, RootDirectory};
    use rootsync_storage::InMemoryStore;

    fn setup() -> (Notifier, Arc<ConnectionPool>) {
        let repository = Arc::new(Repository::new(Arc::new(InMemoryStore::new())));
        repository
            .put_root_dir(&RootDirectory {
                after_path: "/r".into(),
                owner: "c1".into(),
                uuids: vec!["c1".into(), "c2".into(), "c3".into()],
                ..RootDirectory::default()
            })
            .unwrap();
        let pool = Arc::new(ConnectionPool::new());
        let notifier = Notifier::new(Arc::clone(&pool), repository, Duration::from_secs(1));
        (notifier, pool)
    }

    fn notification() -> SyncNotification {
        SyncNotification {
            kind: NotificationKind::FileUpdated,
            after_path: "/r/a".into(),
            root_dir_key: "/r".into(),
            latest_hash: "h2".into(),
            edit_client: "c1".into(),
            timestamp: 7,
        }
    }

    #[tokio::test]
    async fn notifies_other_members() {
        let (notifier, pool) = setup();
        let (mut editor, _e) = MemoryLink::new("c1");
        let (mut other, _o) = MemoryLink::new("c2");
        pool.register("c1", editor.connection());
        pool.register("c2", other.connection());

        assert_eq!(notifier.broadcast(&notification()).await, 1);

        let mut push = other.next_push().await.unwrap();
        assert_eq!(push.name, NOTIFY_SYNC);
        let decoded = SyncNotification::decode(&push.stream.recv_message().await.unwrap()).unwrap();
        assert_eq!(decoded, notification());

        let nothing = tokio::time::timeout(Duration::from_millis(20), editor.next_push()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn closed_connection_is_evicted() {
        let (notifier, pool) = setup();
        let (mut gone, _g) = MemoryLink::new("c2");
        pool.register("c2", gone.connection());
        gone.close();

        assert_eq!(notifier.broadcast(&notification()).await, 0);
        assert!(pool.lookup("c2").is_err());
    }
}
