//! Request/response networking for Tether.
//!
//! The session layer does not talk to bytes. It talks to a small
//! capability set:
//!
//! - a [`NetworkLayer`] that can [`listen`](NetworkLayer::listen) and
//!   announces each new peer as a [`ConnectionEvent`];
//! - a [`Socket`] per peer, which can send a keyed
//!   [`request`](Socket::request) and receive the peer's requests as
//!   [`RequestEvent`]s, each carrying a one-shot respond capability.
//!
//! [`FramedLayer`] / [`FramedSocket`] implement that set over any
//! [`Transport`](tether_transport::Transport) by correlating JSON
//! [`Frame`](tether_protocol::Frame)s by id. Layers stack: the session
//! manager is itself a `NetworkLayer` whose sockets are sessions.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → FramedLayer (Frame ↔ id) → SessionManager → Sync
//! ```

mod error;
mod event;
mod framed;
mod layer;
mod pending;

pub use error::NetworkError;
pub use event::{
    ConnectionEvent, ConnectionListener, RequestEvent, RequestListener,
};
pub use framed::FramedSocket;
pub use layer::FramedLayer;

use std::sync::{Mutex, MutexGuard};

use tether_future::Cancelable;
use tether_transport::ConnectionId;

/// One peer, as seen by the layer above.
///
/// Sockets are cheap handles: clones refer to the same peer.
pub trait Socket: Clone + Send + Sync + 'static {
    /// Sends `message` under `key` and waits for the peer's reply.
    ///
    /// The returned future settles with the reply, with
    /// [`FutureError::Rejected`](tether_future::FutureError::Rejected) if
    /// the request can no longer be answered, or with
    /// [`FutureError::Canceled`](tether_future::FutureError::Canceled) if
    /// the caller cancels it.
    fn request(&self, key: &str, message: &str) -> Cancelable<String>;

    /// Registers a handler for requests the peer sends to us.
    fn add_request_listener(&self, listener: RequestListener);

    /// A stable identifier for this socket.
    fn id(&self) -> ConnectionId;
}

/// Something that produces sockets.
pub trait NetworkLayer: Send + Sync + 'static {
    /// The socket type handed out in connection events.
    type Socket: Socket;

    /// Starts accepting peers. Calling it again is a no-op.
    fn listen(&self);

    /// Registers a handler for newly connected peers.
    fn add_connection_listener(&self, listener: ConnectionListener<Self::Socket>);
}

/// Acquire a mutex guard, ignoring poisoning.
///
/// Listener lists and the pending table stay structurally valid even if a
/// callback panicked while another thread held the lock.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
