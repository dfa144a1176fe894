//! Client and root directory registration.

use crate::error::{ServerError, ServerResult};
use crate::locks::KeyedLocks;
use crate::pool::{ConnectionHandle, ConnectionPool};
use crate::repository::Repository;
use rootsync_protocol::{
    Client, ClientRegisterRequest, ClientRegisterResponse, RootDirJoinRequest,
    RootDirRegisterRequest, RootDirectory,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Registers clients and their root directories.
pub struct RegistrationService {
    repository: Arc<Repository>,
    pool: Arc<ConnectionPool>,
    server_password: Option<String>,
    clients: KeyedLocks,
    roots: KeyedLocks,
}

impl RegistrationService {
    /// Creates the service.
    pub fn new(
        repository: Arc<Repository>,
        pool: Arc<ConnectionPool>,
        server_password: Option<String>,
    ) -> Self {
        Self {
            repository,
            pool,
            server_password,
            clients: KeyedLocks::new(),
            roots: KeyedLocks::new(),
        }
    }

    /// Registers the client behind `connection`.
    ///
    /// An empty uuid gets a fresh identity. A new client gets the next
    /// numeric id; a known one has its address refreshed. The client is
    /// persisted before the connection is bound in the pool, so a store
    /// failure leaves the pool untouched.
    pub fn register_client(
        &self,
        request: &ClientRegisterRequest,
        connection: &ConnectionHandle,
    ) -> ServerResult<ClientRegisterResponse> {
        if let Some(expected) = &self.server_password {
            if request.server_password != *expected {
                return Err(ServerError::AuthenticationFailed(
                    "server password mismatch".into(),
                ));
            }
        }

        let uuid = match request.uuid.trim() {
            "" => Uuid::new_v4().to_string(),
            uuid => uuid.to_string(),
        };
        let ip = connection.remote_addr();

        let _guard = self.clients.lock(&uuid);
        let (client, created) = match self.repository.client(&uuid)? {
            Some(mut client) => {
                client.ip = ip;
                (client, false)
            }
            None => (
                Client::new(uuid.clone(), self.repository.next_client_id()?, ip),
                true,
            ),
        };
        self.repository.put_client(&client)?;
        self.pool.update(&uuid, Arc::clone(connection));

        info!(
            client = %uuid,
            id = client.id,
            ip = %client.ip,
            created,
            "client registered"
        );
        Ok(ClientRegisterResponse {
            uuid,
            id: client.id,
        })
    }

    /// Drops the pool binding made by [`Self::register_client`] while it still
    /// points at `connection`.
    ///
    /// Called when the registration reply could not be delivered, so the
    /// client never learned it was registered. The persisted client record
    /// is kept. Returns true if an entry was removed.
    pub fn unbind_client(&self, uuid: &str, connection: &ConnectionHandle) -> bool {
        let unbound = self.pool.evict_if_current(uuid, connection.id());
        if unbound {
            debug!(
                client = %uuid,
                connection = connection.id(),
                "unbound unconfirmed registration"
            );
        }
        unbound
    }

    /// Registers (or updates) a root directory owned by `client_uuid`.
    ///
    /// Fails with [`ServerError::RootDirOwned`] when the path is already
    /// registered by another client.
    pub fn register_root_dir(
        &self,
        client_uuid: &str,
        request: &RootDirRegisterRequest,
    ) -> ServerResult<RootDirectory> {
        validate_after_path(&request.after_path)?;
        if request.before_path.is_empty() {
            return Err(ServerError::InvalidRequest(
                "before_path must not be empty".into(),
            ));
        }

        let _root_guard = self.roots.lock(&request.after_path);
        let _client_guard = self.clients.lock(client_uuid);
        let mut client = self.known_client(client_uuid)?;

        let root = match self.repository.root_dir(&request.after_path)? {
            Some(existing) if existing.owner != client_uuid => {
                return Err(ServerError::RootDirOwned {
                    after_path: existing.after_path,
                    owner: existing.owner,
                });
            }
            Some(mut existing) => {
                existing.before_path = request.before_path.clone();
                existing.password = request.password.clone();
                existing
            }
            None => RootDirectory {
                after_path: request.after_path.clone(),
                before_path: request.before_path.clone(),
                owner: client_uuid.to_string(),
                password: request.password.clone(),
                uuids: vec![client_uuid.to_string()],
            },
        };

        self.repository.put_root_dir(&root)?;
        client.upsert_root(root.clone());
        self.repository.put_client(&client)?;

        info!(client = %client_uuid, path = %root.after_path, "root directory registered");
        Ok(root)
    }

    /// Adds `client_uuid` to the members of an existing root directory.
    ///
    /// The root must carry a join password and the request must match it.
    pub fn join_root_dir(
        &self,
        client_uuid: &str,
        request: &RootDirJoinRequest,
    ) -> ServerResult<RootDirectory> {
        let _root_guard = self.roots.lock(&request.after_path);
        let _client_guard = self.clients.lock(client_uuid);
        let mut client = self.known_client(client_uuid)?;

        let mut root = self
            .repository
            .root_dir(&request.after_path)?
            .ok_or_else(|| ServerError::not_found("root directory", &request.after_path))?;
        if root.password.is_empty() || root.password != request.password {
            return Err(ServerError::AuthenticationFailed(format!(
                "cannot join {}",
                root.after_path
            )));
        }

        if root.authorize(client_uuid) {
            self.repository.put_root_dir(&root)?;
            info!(client = %client_uuid, path = %root.after_path, "client joined root directory");
        }
        client.upsert_root(root.clone());
        self.repository.put_client(&client)?;
        Ok(root)
    }

    /// Returns a root directory visible to `client_uuid`.
    pub fn get_root_dir(
        &self,
        client_uuid: &str,
        after_path: &str,
    ) -> ServerResult<RootDirectory> {
        self.repository.authorized_root(client_uuid, after_path)
    }

    /// Returns a registered client.
    pub fn client(&self, uuid: &str) -> ServerResult<Option<Client>> {
        self.repository.client(uuid)
    }

    fn known_client(&self, uuid: &str) -> ServerResult<Client> {
        self.repository
            .client(uuid)?
            .ok_or_else(|| ServerError::not_found("client", uuid))
    }
}

fn validate_after_path(after_path: &str) -> ServerResult<()> {
    if !after_path.starts_with('/') {
        return Err(ServerError::InvalidRequest(format!(
            "after_path must be absolute: {after_path:?}"
        )));
    }
    if after_path.contains('\0') {
        return Err(ServerError::InvalidRequest(
            "after_path must not contain NUL".into(),
        ));
    }
    Ok(())
}
