//! Transport abstraction for client connections.
//!
//! The secure transport is provided by the embedder. A connection carries
//! many independent transactions, each a message-framed bidirectional
//! stream identified by `(name, transaction_id)`. The server consumes
//! inbound transactions and opens its own for pushes.

use crate::error::{ServerError, ServerResult};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier of one live connection.
pub type ConnectionId = u64;

/// One transaction's message-framed stream.
///
/// Messages arrive in send order. Receives wait until a message is
/// available; there is no implicit timeout.
#[async_trait]
pub trait MessageStream: Send {
    /// Sends one message to the peer.
    async fn send_message(&mut self, message: Vec<u8>) -> ServerResult<()>;

    /// Receives the next message from the peer.
    async fn recv_message(&mut self) -> ServerResult<Vec<u8>>;

    /// Finishes the transaction normally.
    async fn close(&mut self) -> ServerResult<()>;

    /// Tears the transaction down, signalling failure to the peer.
    async fn abort(&mut self);
}

/// A live client connection.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Returns the connection identifier.
    fn id(&self) -> ConnectionId;

    /// Returns the peer address.
    fn remote_addr(&self) -> String;

    /// Returns true once the connection can no longer carry transactions.
    fn is_closed(&self) -> bool;

    /// Opens a server-initiated transaction.
    async fn open_transaction(&self, name: &str) -> ServerResult<Box<dyn MessageStream>>;
}

/// A transaction opened by the client.
pub struct InboundTransaction {
    /// Transaction name.
    pub name: String,
    /// Opaque id assigned by the transport.
    pub transaction_id: u64,
    /// Stream of the transaction.
    pub stream: Box<dyn MessageStream>,
}

impl fmt::Debug for InboundTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundTransaction")
            .field("name", &self.name)
            .field("transaction_id", &self.transaction_id)
            .finish_non_exhaustive()
    }
}

enum Frame {
    Message(Vec<u8>),
    Abort,
}

/// In-process stream backed by channels.
pub struct MemoryStream {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStream")
            .field("open", &self.tx.is_some())
            .finish()
    }
}

/// Creates two connected stream ends.
pub fn memory_stream_pair() -> (MemoryStream, MemoryStream) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryStream {
            tx: Some(a_tx),
            rx: b_rx,
        },
        MemoryStream {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn send_message(&mut self, message: Vec<u8>) -> ServerResult<()> {
        let tx = self.tx.as_ref().ok_or(ServerError::ConnectionClosed)?;
        tx.send(Frame::Message(message))
            .map_err(|_| ServerError::ConnectionClosed)
    }

    async fn recv_message(&mut self) -> ServerResult<Vec<u8>> {
        match self.rx.recv().await {
            Some(Frame::Message(message)) => Ok(message),
            Some(Frame::Abort) => Err(ServerError::Transport(
                "transaction aborted by peer".into(),
            )),
            None => Err(ServerError::ConnectionClosed),
        }
    }

    async fn close(&mut self) -> ServerResult<()> {
        self.tx = None;
        Ok(())
    }

    async fn abort(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Frame::Abort);
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Server side of an in-process connection.
///
/// Server-initiated transactions are delivered to the paired
/// [`MemoryLink`].
pub struct MemoryConnection {
    id: ConnectionId,
    remote_addr: String,
    closed: AtomicBool,
    next_transaction: AtomicU64,
    pushes: mpsc::UnboundedSender<InboundTransaction>,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MemoryConnection {
    /// Marks the connection closed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.pushes.is_closed()
    }

    async fn open_transaction(&self, name: &str) -> ServerResult<Box<dyn MessageStream>> {
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        let (local, remote) = memory_stream_pair();
        let transaction = InboundTransaction {
            name: name.to_string(),
            transaction_id: self.next_transaction.fetch_add(1, Ordering::Relaxed),
            stream: Box::new(remote),
        };
        self.pushes.send(transaction).map_err(|_| {
            self.close();
            ServerError::ConnectionClosed
        })?;
        Ok(Box::new(local))
    }
}

/// Client side of an in-process connection.
///
/// Opens transactions towards the server and receives the server's pushes.
#[derive(Debug)]
pub struct MemoryLink {
    connection: Arc<MemoryConnection>,
    inbound: Option<mpsc::Sender<InboundTransaction>>,
    pushes: mpsc::UnboundedReceiver<InboundTransaction>,
    next_transaction: AtomicU64,
}

impl MemoryLink {
    /// Creates a link for a client at `remote_addr`.
    ///
    /// Returns the link and the receiver the server consumes inbound
    /// transactions from.
    pub fn new(remote_addr: impl Into<String>) -> (Self, mpsc::Receiver<InboundTransaction>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(MemoryConnection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr: remote_addr.into(),
            closed: AtomicBool::new(false),
            next_transaction: AtomicU64::new(1),
            pushes: push_tx,
        });
        let link = Self {
            connection,
            inbound: Some(inbound_tx),
            pushes: push_rx,
            next_transaction: AtomicU64::new(1),
        };
        (link, inbound_rx)
    }

    /// Returns the server side of this connection.
    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.connection) as Arc<dyn Connection>
    }

    /// Opens a transaction and returns the client end of its stream.
    pub async fn begin(&self, name: &str) -> ServerResult<MemoryStream> {
        let inbound = self.inbound.as_ref().ok_or(ServerError::ConnectionClosed)?;
        let (local, remote) = memory_stream_pair();
        let transaction = InboundTransaction {
            name: name.to_string(),
            transaction_id: self.next_transaction.fetch_add(1, Ordering::Relaxed),
            stream: Box::new(remote),
        };
        inbound
            .send(transaction)
            .await
            .map_err(|_| ServerError::ConnectionClosed)?;
        Ok(local)
    }

    /// Runs a one-message request/response transaction.
    pub async fn request(&self, name: &str, message: Vec<u8>) -> ServerResult<Vec<u8>> {
        let mut stream = self.begin(name).await?;
        stream.send_message(message).await?;
        stream.recv_message().await
    }

    /// Waits for the next server-initiated transaction.
    pub async fn next_push(&mut self) -> Option<InboundTransaction> {
        self.pushes.recv().await
    }

    /// Closes the connection. The server sees the end of its inbound
    /// transactions.
    pub fn close(&mut self) {
        self.connection.close();
        self.inbound = None;
    }
}
