use std::io;

use crate::ConnectionId;

/// Errors that can occur in the transport layer.
///
/// Every per-connection variant names the connection, so a log line is
/// enough to tell which peer dropped.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection (or the link under it) is gone.
    #[error("{0} closed")]
    Closed(ConnectionId),

    /// Writing to the peer failed.
    #[error("send on {id} failed: {source}")]
    Send {
        id: ConnectionId,
        #[source]
        source: io::Error,
    },

    /// Reading from the peer failed.
    #[error("receive on {id} failed: {source}")]
    Receive {
        id: ConnectionId,
        #[source]
        source: io::Error,
    },

    /// Binding the listening socket failed.
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Accepting (or upgrading) an incoming connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Dialing a remote peer failed.
    #[error("connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: io::Error,
    },

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
