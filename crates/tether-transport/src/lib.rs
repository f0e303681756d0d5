//! Byte transports for Tether.
//!
//! A [`Transport`] hands out [`Connection`]s; a connection moves opaque
//! byte messages in both directions until either side closes it. The
//! layers above never learn which transport they run on.
//!
//! | Transport | Feature | Used for |
//! |---|---|---|
//! | [`WebSocketTransport`] | `websocket` (default) | real clients |
//! | [`MemoryTransport`] | always | tests and in-process demos |

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryConnector, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Names one connection in logs and lookup tables.
///
/// Ids from [`ConnectionId::next`] are unique per process, whichever
/// transport allocated them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A source of inbound connections.
///
/// Futures are `Send` so the accept loop can run on a spawned task.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Resolves with the next peer. After [`shutdown`](Self::shutdown) it
    /// fails instead, which ends the accept loop.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    fn shutdown(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// One peer. Sending and receiving may run concurrently from different
/// tasks.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// The next message, or `Ok(None)` once either side has closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes both directions; the peer's `recv` yields `None`.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn id(&self) -> ConnectionId;
}
