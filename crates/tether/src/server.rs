//! `TetherServer` builder.
//!
//! Ties the layers together: transport → framing → sessions → sync.

use std::net::SocketAddr;

use tether_network::{FramedLayer, FramedSocket};
use tether_session::{SessionConfig, SessionManager, SessionRegistry};
use tether_sync::{SyncConfig, SyncServer};
use tether_transport::{Connection, Transport, TransportError, WebSocketTransport};

use crate::TetherError;

/// The sync server a [`TetherServer`] exposes.
pub type SessionSync<T> = SyncServer<SessionManager<FramedLayer<T>>>;

/// Builder for a [`TetherServer`].
///
/// # Example
///
/// ```rust,no_run
/// use tether::prelude::*;
///
/// # async fn demo() -> Result<(), TetherError> {
/// let server = TetherServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.listen();
/// let players = server.sync().wait_for_clients(2).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TetherServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    sync_config: SyncConfig,
}

impl TetherServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            session_config: SessionConfig::default(),
            sync_config: SyncConfig::default(),
        }
    }

    /// Sets the address [`build`](Self::build) binds to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    /// Binds a WebSocket listener and builds the stack on top of it.
    pub async fn build(self) -> Result<TetherServer<WebSocketTransport>, TetherError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let local_addr = transport.local_addr().ok();
        let mut server = self.build_with(transport)?;
        server.local_addr = local_addr;
        Ok(server)
    }

    /// Builds the stack on an already constructed transport. The bind
    /// address is ignored.
    pub fn build_with<T>(self, transport: T) -> Result<TetherServer<T>, TetherError>
    where
        T: Transport<Error = TransportError>,
        T::Connection: Connection<Error = TransportError>,
    {
        let sessions = SessionManager::new(FramedLayer::new(transport), self.session_config)?;
        Ok(TetherServer {
            sync: SyncServer::new(sessions, self.sync_config),
            local_addr: None,
        })
    }
}

impl Default for TetherServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A Tether server: sessions over a transport, with a sync server on top.
///
/// Nothing is accepted until [`listen`](Self::listen).
pub struct TetherServer<T>
where
    T: Transport<Error = TransportError>,
    T::Connection: Connection<Error = TransportError>,
{
    sync: SessionSync<T>,
    local_addr: Option<SocketAddr>,
}

impl TetherServer<WebSocketTransport> {
    pub fn builder() -> TetherServerBuilder {
        TetherServerBuilder::new()
    }
}

impl<T> TetherServer<T>
where
    T: Transport<Error = TransportError>,
    T::Connection: Connection<Error = TransportError>,
{
    /// The address the WebSocket listener is bound to, if there is one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn sync(&self) -> &SessionSync<T> {
        &self.sync
    }

    pub fn sessions(&self) -> SessionRegistry<FramedSocket> {
        self.sync.network().registry()
    }

    /// Starts accepting clients. Calling it again is a no-op.
    pub fn listen(&self) {
        tracing::info!(addr = ?self.local_addr, "tether server listening");
        self.sync.listen();
    }
}
