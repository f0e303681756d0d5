//! Unified error type for the Tether facade.

use tether_future::FutureError;
use tether_network::NetworkError;
use tether_protocol::ProtocolError;
use tether_session::SessionError;
use tether_sync::SyncError;
use tether_transport::TransportError;

/// One error type for applications that only depend on `tether`.
///
/// Every layer keeps its own error enum; `?` converts any of them into
/// this one.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A request was canceled or rejected.
    #[error(transparent)]
    Future(#[from] FutureError),
}
