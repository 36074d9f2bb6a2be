//! Connection registry: the network front of a node.
//!
//! A server binds, accepts peers and tracks one [`Connection`] per socket. A
//! client opens one connection to its server and requests every named table
//! on it, including tables created after the connection is up.

use crate::config::NodeConfig;
use crate::connection::Connection;
use crate::error::NodeError;
use dashmap::DashMap;
use nettables_core::{Arena, ConnectionId, Role, Table};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

struct RegistryInner {
    arena: Arc<Arena>,
    config: NodeConfig,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    next_id: AtomicU64,
    /// Set while a client holds, or is opening, its one connection.
    outbound: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: broadcast::Sender<()>,
}

/// Tracks the live connections of one node.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Creates a registry with a fresh arena for the configured role.
    pub fn new(config: NodeConfig) -> Self {
        let arena = Arena::new(config.network.role.into());
        Self::with_arena(config, arena)
    }

    /// Creates a registry over an existing arena. The arena's role wins over
    /// the configured one.
    pub fn with_arena(config: NodeConfig, arena: Arc<Arena>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(RegistryInner {
                arena,
                config,
                connections: DashMap::new(),
                next_id: AtomicU64::new(1),
                outbound: AtomicBool::new(false),
                local_addr: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.inner.arena
    }

    pub fn role(&self) -> Role {
        self.inner.arena.role()
    }

    /// Returns the named table. On a client, a table created here is
    /// requested from the server right away.
    pub fn table(&self, name: &str) -> Arc<Table> {
        let table = self.inner.arena.table(name);
        if !self.role().is_server() {
            for connection in self.connections() {
                connection.request_table(&table);
            }
        }
        table
    }

    /// Binds the configured address and accepts peers in the background.
    pub async fn serve(&self) -> Result<SocketAddr, NodeError> {
        self.serve_on(self.inner.config.network.bind_addr).await
    }

    pub async fn serve_on(&self, addr: SocketAddr) -> Result<SocketAddr, NodeError> {
        if !self.role().is_server() {
            return Err(NodeError::WrongRole {
                role: self.role(),
                operation: "accept peers",
            });
        }
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(local_addr);
        tracing::info!("Server listening on {}", local_addr);

        let inner = self.inner.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("Client connected: {}", addr);
                                RegistryInner::attach(&inner, stream, addr);
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Connects to the configured server address.
    pub async fn connect(&self) -> Result<Arc<Connection>, NodeError> {
        self.connect_to(self.inner.config.network.server_addr).await
    }

    /// Opens the client's connection. A client holds at most one; it may
    /// connect again once the previous connection has closed.
    pub async fn connect_to(&self, addr: SocketAddr) -> Result<Arc<Connection>, NodeError> {
        if self.role().is_server() {
            return Err(NodeError::WrongRole {
                role: self.role(),
                operation: "connect to a server",
            });
        }
        if self.inner.outbound.swap(true, Ordering::AcqRel) {
            return Err(NodeError::AlreadyConnected);
        }
        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.outbound.store(false, Ordering::Release);
                return Err(e.into());
            }
        };
        tracing::info!("Connected to {}", addr);
        let connection = RegistryInner::attach(&self.inner, stream, addr);
        for table in self.inner.arena.named_tables() {
            connection.request_table(&table);
        }
        Ok(connection)
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner
            .connections
            .iter()
            .map(|c| c.value().clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Stops accepting and closes every connection.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(());
        for connection in self.connections() {
            connection.close();
        }
        self.inner.connections.clear();
    }
}

impl RegistryInner {
    fn attach(inner: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Arc<Connection> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::new(
            id,
            addr,
            inner.arena.clone(),
            inner.config.timing.clone(),
        );
        inner.connections.insert(id, connection.clone());
        connection.start(stream);

        let registry = Arc::downgrade(inner);
        let watched = connection.clone();
        tokio::spawn(async move {
            watched.closed().await;
            if let Some(registry) = registry.upgrade() {
                if !registry.arena.role().is_server() {
                    registry.outbound.store(false, Ordering::Release);
                }
                registry.connections.remove(&watched.id());
            }
            tracing::info!("Peer disconnected: {}", watched.peer_addr());
        });

        connection
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("role", &self.role())
            .field("connections", &self.connection_count())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
