//! Error types for the network layer.

use tether_protocol::ProtocolError;
use tether_transport::TransportError;

/// Errors that can occur while moving frames over a connection.
///
/// These never reach a request caller as-is: the socket absorbs them,
/// logs them, and settles affected requests with a rejection carrying the
/// error's message.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The connection is gone; no further frames will be exchanged.
    #[error("connection closed")]
    Closed,

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The underlying connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
