//! Server wiring.

use crate::admin::{build_router, AdminState};
use crate::clock::MonotonicClock;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::handlers::{build_dispatcher, Services};
use crate::notify::Notifier;
use crate::pool::{ConnectionHandle, ConnectionPool};
use crate::registration::RegistrationService;
use crate::repository::Repository;
use crate::sharing::SharingService;
use crate::sync::SyncEngine;
use crate::transport::InboundTransaction;
use axum::Router;
use rootsync_storage::{FileStore, InMemoryStore, KvStore};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// The sync server.
///
/// Owns the store, the connection pool and the services, and serves
/// connections handed to it by a transport.
///
/// # Example
///
/// ```
/// use rootsync_server::{MemoryLink, ServerConfig, SyncServer};
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// runtime.block_on(async {
///     let server = SyncServer::in_memory(ServerConfig::default()).unwrap();
///     let (link, inbound) = MemoryLink::new("127.0.0.1:50000");
///     let task = server.accept(link.connection(), inbound);
///     drop(link);
///     task.await.unwrap();
/// });
/// ```
pub struct SyncServer {
    config: Arc<ServerConfig>,
    repository: Arc<Repository>,
    pool: Arc<ConnectionPool>,
    registration: Arc<RegistrationService>,
    sync: Arc<SyncEngine>,
    sharing: Arc<SharingService>,
    notifier: Arc<Notifier>,
    dispatcher: Arc<Dispatcher>,
}

impl SyncServer {
    /// Creates a server over `store`.
    pub fn new(config: ServerConfig, store: Arc<dyn KvStore>) -> ServerResult<Self> {
        let config = Arc::new(config);
        let repository = Arc::new(Repository::new(store));
        let pool = Arc::new(ConnectionPool::new());
        let clock = Arc::new(MonotonicClock::starting_after(
            repository.max_sync_timestamp()?,
        ));

        let registration = Arc::new(RegistrationService::new(
            Arc::clone(&repository),
            Arc::clone(&pool),
            config.server_password.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(Arc::clone(&repository), clock));
        let sharing = Arc::new(SharingService::new(
            Arc::clone(&repository),
            config.max_share_count,
        ));
        let notifier = Arc::new(Notifier::new(
            Arc::clone(&pool),
            Arc::clone(&repository),
            config.notify_timeout,
        ));

        let services = Arc::new(Services {
            registration: Arc::clone(&registration),
            sync: Arc::clone(&sync),
            sharing: Arc::clone(&sharing),
            notifier: Arc::clone(&notifier),
            max_message_size: config.max_message_size,
        });
        let dispatcher = Arc::new(build_dispatcher(services, Arc::clone(&pool))?);

        Ok(Self {
            config,
            repository,
            pool,
            registration,
            sync,
            sharing,
            notifier,
            dispatcher,
        })
    }

    /// Creates a server with an in-memory store.
    pub fn in_memory(config: ServerConfig) -> ServerResult<Self> {
        Self::new(config, Arc::new(InMemoryStore::new()))
    }

    /// Creates a server over the configured data directory, or in memory
    /// when none is configured.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        match config.data_dir.clone() {
            Some(dir) => {
                let store = FileStore::open(&dir)?;
                info!(path = %dir.display(), "store opened");
                Self::new(config, Arc::new(store))
            }
            None => Self::in_memory(config),
        }
    }

    /// Serves one connection on a new task.
    pub fn accept(
        &self,
        connection: ConnectionHandle,
        inbound: mpsc::Receiver<InboundTransaction>,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(dispatcher.serve_connection(connection, inbound))
    }

    /// Returns the administrative HTTP router.
    pub fn admin_router(&self) -> Router {
        build_router(AdminState {
            registration: Arc::clone(&self.registration),
            sharing: Arc::clone(&self.sharing),
            pool: Arc::clone(&self.pool),
        })
    }

    /// Serves the administrative HTTP API until `shutdown` completes.
    pub async fn serve_admin<F>(&self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        info!(%addr, "admin API listening");
        axum::serve(listener, self.admin_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        self.repository.flush()?;
        info!("admin API stopped");
        Ok(())
    }

    /// Flushes the store.
    pub fn flush(&self) -> ServerResult<()> {
        self.repository.flush()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the connection pool.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Returns the store adapter.
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Returns the registration service.
    pub fn registration(&self) -> &Arc<RegistrationService> {
        &self.registration
    }

    /// Returns the sync engine.
    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Returns the sharing service.
    pub fn sharing(&self) -> &Arc<SharingService> {
        &self.sharing
    }

    /// Returns the notifier.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootsync_protocol::transaction::{PUSH_FILE, REGISTER_CLIENT, SHARE_FILE};

    #[test]
    fn dispatcher_serves_every_transaction() {
        let server = SyncServer::in_memory(ServerConfig::default()).unwrap();
        for name in [REGISTER_CLIENT, PUSH_FILE, SHARE_FILE] {
            assert!(server.dispatcher().has_handler(name));
        }
        assert_eq!(server.dispatcher().transaction_names().len(), 8);
    }

    #[test]
    fn open_without_data_dir_is_in_memory() {
        let server = SyncServer::open(ServerConfig::default()).unwrap();
        assert!(server.pool().is_empty());
        assert_eq!(server.config().max_share_count, 1000);
    }

    #[test]
    fn open_with_data_dir_locks_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::default().with_data_dir(dir.path());
        let _server = SyncServer::open(config.clone()).unwrap();
        assert!(matches!(
            SyncServer::open(config),
            Err(ServerError::Storage(_))
        ));
    }
}
