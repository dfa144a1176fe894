//! Transaction dispatcher.
//!
//! Routes inbound transactions to handlers by name. Each connection runs
//! a small state machine:
//!
//! ```text
//! Unauthenticated ──(initial transaction ok)──► Active ──(inbound ends)──► Closed
//! ```
//!
//! Only the initial (registration) transaction is accepted before a
//! connection is Active. Closed is terminal.

use crate::error::{ServerError, ServerResult};
use crate::pool::{ConnectionHandle, ConnectionPool};
use crate::transport::{InboundTransaction, MessageStream};
use async_trait::async_trait;
use rootsync_protocol::transaction::{self, REGISTER_CLIENT};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Metadata handed to a transaction handler.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    /// Connection the transaction arrived on.
    pub connection: ConnectionHandle,
    /// Identity the connection registered as.
    pub client_uuid: String,
    /// Transaction name.
    pub name: String,
    /// Opaque transaction id.
    pub transaction_id: u64,
}

/// Handler of the initial transaction, run before identity is known.
#[async_trait]
pub trait InitialHandler: Send + Sync {
    /// Registers the client and returns its identity.
    async fn register(
        &self,
        connection: &ConnectionHandle,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<String>;
}

/// Handler of a named transaction on an Active connection.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    /// Serves one transaction.
    async fn handle(
        &self,
        context: &TransactionContext,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<()>;
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    initial: Arc<dyn InitialHandler>,
    handlers: HashMap<String, Arc<dyn TransactionHandler>>,
}

impl DispatcherBuilder {
    /// Registers `handler` for transactions named `name`.
    ///
    /// The initial transaction is served only by the handler given to
    /// [`Dispatcher::builder`]; registering its name here fails.
    pub fn register(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn TransactionHandler>,
    ) -> ServerResult<Self> {
        let name = name.into();
        if transaction::is_initial(&name) {
            return Err(ServerError::InvalidRequest(format!(
                "{name} is served by the initial handler"
            )));
        }
        if name.is_empty() {
            return Err(ServerError::InvalidRequest(
                "transaction name must not be empty".into(),
            ));
        }
        self.handlers.insert(name, handler);
        Ok(self)
    }

    /// Finishes the dispatcher.
    pub fn build(self, pool: Arc<ConnectionPool>) -> Dispatcher {
        Dispatcher {
            initial: self.initial,
            handlers: self.handlers,
            pool,
        }
    }
}

/// Immutable routing table shared by all connections.
pub struct Dispatcher {
    initial: Arc<dyn InitialHandler>,
    handlers: HashMap<String, Arc<dyn TransactionHandler>>,
    pool: Arc<ConnectionPool>,
}

impl Dispatcher {
    /// Starts a dispatcher whose initial transaction is served by `initial`.
    pub fn builder(initial: Arc<dyn InitialHandler>) -> DispatcherBuilder {
        DispatcherBuilder {
            initial,
            handlers: HashMap::new(),
        }
    }

    /// Returns true if a handler is registered for `name`.
    pub fn has_handler(&self, name: &str) -> bool {
        transaction::is_initial(name) || self.handlers.contains_key(name)
    }

    /// Returns the registered transaction names, sorted.
    pub fn transaction_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.push(REGISTER_CLIENT.to_string());
        names.sort();
        names
    }

    /// Creates the per-connection session state.
    pub fn session(self: &Arc<Self>, connection: ConnectionHandle) -> Session {
        Session {
            dispatcher: Arc::clone(self),
            connection,
            state: ConnectionState::Unauthenticated,
            tasks: JoinSet::new(),
        }
    }

    /// Serves one connection until its inbound transactions end.
    ///
    /// Each transaction of an Active connection runs on its own task. When
    /// the inbound channel closes the session is closed: the pool entry is
    /// evicted if it still belongs to this connection and open transactions
    /// are aborted.
    pub async fn serve_connection(
        self: Arc<Self>,
        connection: ConnectionHandle,
        mut inbound: mpsc::Receiver<InboundTransaction>,
    ) {
        let mut session = self.session(connection);
        debug!(connection = session.connection.id(), "connection opened");

        loop {
            tokio::select! {
                next = inbound.recv() => match next {
                    Some(transaction) => {
                        let name = transaction.name.clone();
                        if let Err(err) = session.dispatch(transaction).await {
                            warn!(
                                connection = session.connection.id(),
                                transaction = %name,
                                error = %err,
                                "transaction rejected"
                            );
                        }
                    }
                    None => break,
                },
                Some(joined) = session.tasks.join_next(), if !session.tasks.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            warn!(
                                connection = session.connection.id(),
                                "transaction task panicked"
                            );
                        }
                    }
                }
            }
        }

        session.close().await;
    }
}

/// Lifecycle state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the initial transaction.
    Unauthenticated,
    /// Registered as `client_uuid`.
    Active {
        /// Identity of the client.
        client_uuid: String,
    },
    /// No further transactions are served.
    Closed,
}

/// Dispatch state of one connection.
pub struct Session {
    dispatcher: Arc<Dispatcher>,
    connection: ConnectionHandle,
    state: ConnectionState,
    tasks: JoinSet<()>,
}

impl Session {
    /// Returns the connection state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Returns the registered identity, once Active.
    pub fn client_uuid(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Active { client_uuid } => Some(client_uuid),
            _ => None,
        }
    }

    /// Returns the number of transaction tasks not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Routes one inbound transaction.
    ///
    /// The initial transaction runs to completion before returning, so
    /// transactions that follow it observe the Active state. Other
    /// transactions are spawned and this returns immediately. A rejected
    /// transaction has its stream aborted and no side effects.
    pub async fn dispatch(&mut self, transaction: InboundTransaction) -> ServerResult<()> {
        let InboundTransaction {
            name,
            transaction_id,
            mut stream,
        } = transaction;

        if self.state == ConnectionState::Closed {
            stream.abort().await;
            return Err(ServerError::ConnectionClosed);
        }

        let Some(client_uuid) = self.client_uuid().map(str::to_string) else {
            if !transaction::is_initial(&name) {
                stream.abort().await;
                return Err(ServerError::NotRegistered(name));
            }
            return self.register(stream).await;
        };

        if transaction::is_initial(&name) {
            stream.abort().await;
            return Err(ServerError::InvalidRequest(format!(
                "connection already registered as {client_uuid}"
            )));
        }

        let Some(handler) = self.dispatcher.handlers.get(&name).map(Arc::clone) else {
            stream.abort().await;
            return Err(ServerError::UnknownTransaction(name));
        };

        debug!(client = %client_uuid, transaction = %name, transaction_id, "dispatching");
        let context = TransactionContext {
            connection: Arc::clone(&self.connection),
            client_uuid,
            name,
            transaction_id,
        };
        self.tasks.spawn(async move {
            match handler.handle(&context, stream.as_mut()).await {
                Ok(()) => {
                    if let Err(err) = stream.close().await {
                        debug!(transaction = %context.name, error = %err, "close failed");
                    }
                }
                Err(err) => {
                    warn!(
                        client = %context.client_uuid,
                        transaction = %context.name,
                        transaction_id = context.transaction_id,
                        error = %err,
                        "transaction failed"
                    );
                    stream.abort().await;
                }
            }
        });
        Ok(())
    }

    async fn register(&mut self, mut stream: Box<dyn MessageStream>) -> ServerResult<()> {
        let initial = Arc::clone(&self.dispatcher.initial);
        match initial.register(&self.connection, stream.as_mut()).await {
            Ok(client_uuid) => {
                // The client is bound in the pool from here on, so the
                // session must own the binding even if closing fails.
                self.state = ConnectionState::Active { client_uuid };
                stream.close().await
            }
            Err(err) => {
                stream.abort().await;
                Err(err)
            }
        }
    }

    /// Closes the session.
    ///
    /// Evicts the pool entry if it still points at this connection and
    /// aborts every open transaction. An unregistered session also drops
    /// any binding a failed initial transaction left behind. Idempotent.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Closed);
        match &previous {
            ConnectionState::Active { client_uuid } => {
                self.dispatcher
                    .pool
                    .evict_if_current(client_uuid, self.connection.id());
            }
            ConnectionState::Unauthenticated => {
                self.dispatcher.pool.evict_connection(self.connection.id());
            }
            ConnectionState::Closed => {}
        }
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        if previous != ConnectionState::Closed {
            debug!(connection = self.connection.id(), "connection closed");
        }
    }
}
