//! TCP acceptor and live-connection registry.
//!
//! [`Server`] accepts streams and runs one task per connection. Each task
//! owns its [`WebSocket`] and reports to a [`Handler`]. Established
//! connections are tracked in a [`Registry`]; other tasks reach them by
//! sending [`Command`]s through their [`ConnectionHandle`].

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{Connection, Event};
use crate::error::{Error, Result};
use crate::transport::WebSocket;

/// Registry key of a connection, unique per [`Server`].
pub type ConnectionId = u64;

/// Work queued for a connection's task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a text message.
    SendText(String),
    /// Send a ping.
    Ping(Vec<u8>),
    /// Start the close handshake.
    Close(u16, String),
}

/// Cheap, clonable reference to a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    path: String,
    tx: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its task drains.
    pub fn new(
        id: ConnectionId,
        peer: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            peer,
            path: String::new(),
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Request target of the handshake. Empty until the connection is established.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Queue a command.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` if the connection's task has finished.
    pub fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::ConnectionClosed)
    }

    /// Queue a text message.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` if the connection's task has finished.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::SendText(text.into()))
    }

    /// Queue a ping.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` if the connection's task has finished.
    pub fn ping(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Command::Ping(payload.into()))
    }

    /// Queue a close.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` if the connection's task has finished.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<()> {
        self.send(Command::Close(code, reason.into()))
    }
}

/// Established connections, shared between all connection tasks.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    pub async fn insert(&self, handle: ConnectionHandle) {
        let id = handle.id;
        self.connections.write().await.insert(id, handle);
        debug!(id, "connection registered");
    }

    /// Remove a connection, returning its handle if it was present.
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let removed = self.connections.write().await.remove(&id);
        if removed.is_some() {
            debug!(id, "connection unregistered");
        }
        removed
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Number of established connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Queue `text` on every connection. Returns how many accepted it.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let connections = self.connections.read().await;
        let delivered = connections
            .values()
            .filter(|handle| handle.send_text(text).is_ok())
            .count();
        debug!(delivered, total = connections.len(), "broadcast");
        delivered
    }
}

/// Application callbacks for server connections. Every method defaults to doing nothing.
///
/// `on_error` and `on_connection_closed` are only called for connections
/// that completed the handshake.
pub trait Handler: Send + Sync + 'static {
    fn on_connection_established(&self, conn: &ConnectionHandle) -> impl Future<Output = ()> + Send {
        let _ = conn;
        async {}
    }

    fn on_text(&self, conn: &ConnectionHandle, text: String) -> impl Future<Output = ()> + Send {
        let _ = (conn, text);
        async {}
    }

    fn on_pong(&self, conn: &ConnectionHandle, payload: String) -> impl Future<Output = ()> + Send {
        let _ = (conn, payload);
        async {}
    }

    fn on_error(&self, conn: &ConnectionHandle, err: &Error) -> impl Future<Output = ()> + Send {
        let _ = (conn, err);
        async {}
    }

    fn on_connection_closed(
        &self,
        conn: &ConnectionHandle,
        code: u16,
        reason: &str,
    ) -> impl Future<Output = ()> + Send {
        let _ = (conn, code, reason);
        async {}
    }
}

/// Accepts TCP connections and serves each one on its own task.
pub struct Server<H> {
    listener: TcpListener,
    config: Config,
    registry: Registry,
    handler: Arc<H>,
    next_id: AtomicU64,
}

impl<H: Handler> Server<H> {
    /// Bind a listener.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the address cannot be bound.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: Config,
        registry: Registry,
        handler: H,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config,
            registry,
            handler: Arc::new(handler),
            next_id: AtomicU64::new(1),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Accept connections until accepting fails.
    ///
    /// # Errors
    ///
    /// `Error::Io` from `accept`.
    pub async fn serve(self) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            if let Err(err) = stream.set_nodelay(true) {
                debug!(%peer, error = %err, "could not set TCP_NODELAY");
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            debug!(id, %peer, "accepted stream");

            tokio::spawn(serve_connection(
                stream,
                id,
                Some(peer),
                self.config.clone(),
                self.registry.clone(),
                Arc::clone(&self.handler),
            ));
        }
    }
}

/// Serve one stream until its connection closes.
///
/// The connection is registered when its handshake completes and removed
/// when it closes. Usable with any stream, not only the ones [`Server`] accepts.
pub async fn serve_connection<T, H>(
    io: T,
    id: ConnectionId,
    peer: Option<SocketAddr>,
    config: Config,
    registry: Registry,
    handler: Arc<H>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    let timeouts = config.timeouts.clone();
    let mut ws = WebSocket::new(io, Connection::server(config), timeouts);
    let (mut handle, mut commands) = ConnectionHandle::new(id, peer);
    let mut established = false;

    loop {
        tokio::select! {
            event = ws.recv() => {
                let Some(event) = event else { break };
                match event {
                    Event::Connected => {
                        established = true;
                        handle.path = ws.connection().path().to_string();
                        registry.insert(handle.clone()).await;
                        handler.on_connection_established(&handle).await;
                    }
                    Event::Text(text) => handler.on_text(&handle, text).await,
                    Event::Pong(payload) => handler.on_pong(&handle, payload).await,
                    Event::Error(err) if established => handler.on_error(&handle, &err).await,
                    Event::Error(err) => debug!(id, error = %err, "handshake rejected"),
                    Event::Closed { code, reason } => {
                        if established {
                            registry.remove(id).await;
                            handler.on_connection_closed(&handle, code, &reason).await;
                        }
                    }
                }
            }
            Some(command) = commands.recv() => {
                let result = match command {
                    Command::SendText(text) => ws.send_text(&text).await,
                    Command::Ping(payload) => ws.ping(payload).await,
                    Command::Close(code, reason) => ws.close(code, &reason).await,
                };
                if let Err(err) = result {
                    warn!(id, error = %err, "command failed");
                }
            }
        }
    }

    registry.remove(id).await;
    debug!(id, "connection task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_insert_remove() {
        let registry = Registry::new();
        let (handle, _rx) = ConnectionHandle::new(7, None);
        registry.insert(handle).await;
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.ids().await, vec![7]);
        assert!(registry.get(7).await.is_some());

        assert!(registry.remove(7).await.is_some());
        assert!(registry.remove(7).await.is_none());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_skips_finished_tasks() {
        let registry = Registry::new();
        let (live, mut live_rx) = ConnectionHandle::new(1, None);
        let (gone, gone_rx) = ConnectionHandle::new(2, None);
        drop(gone_rx);
        registry.insert(live).await;
        registry.insert(gone).await;

        assert_eq!(registry.broadcast_text("hello").await, 1);
        assert_eq!(
            live_rx.recv().await,
            Some(Command::SendText("hello".into()))
        );
    }

    #[test]
    fn test_handle_send_after_task_exit() {
        let (handle, rx) = ConnectionHandle::new(3, None);
        drop(rx);
        assert_eq!(handle.send_text("x"), Err(Error::ConnectionClosed));
    }
}
