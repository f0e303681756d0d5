//! Events delivered to listeners: inbound requests and new connections.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::lock;

type Respond = Box<dyn FnOnce(String) + Send>;
type AcceptHook = Box<dyn FnOnce() + Send>;

/// Handler for inbound requests on a socket.
pub type RequestListener = Arc<dyn Fn(RequestEvent) + Send + Sync>;

/// Handler for newly connected peers.
pub type ConnectionListener<S> = Arc<dyn Fn(ConnectionEvent<S>) + Send + Sync>;

// ---------------------------------------------------------------------------
// RequestEvent
// ---------------------------------------------------------------------------

/// A request received from a peer.
///
/// Every registered listener receives its own clone; all clones share a
/// single respond capability, and only the first [`respond`](Self::respond)
/// reaches the peer.
#[derive(Clone)]
pub struct RequestEvent {
    key: String,
    message: String,
    responder: Arc<Mutex<Option<Respond>>>,
}

impl RequestEvent {
    /// Creates an event whose reply is delivered through `respond`.
    pub fn new(
        key: impl Into<String>,
        message: impl Into<String>,
        respond: impl FnOnce(String) + Send + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
            responder: Arc::new(Mutex::new(Some(Box::new(respond)))),
        }
    }

    /// The request key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The request payload.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Answers the request. Returns `false` if it was already answered.
    pub fn respond(&self, reply: impl Into<String>) -> bool {
        let respond = lock(&self.responder).take();
        match respond {
            Some(respond) => {
                respond(reply.into());
                true
            }
            None => false,
        }
    }

    /// Returns `true` once some clone of this event has responded.
    pub fn is_answered(&self) -> bool {
        lock(&self.responder).is_none()
    }

    /// Re-labels the event with a new key and payload, keeping the same
    /// respond capability.
    ///
    /// Layers that nest traffic use this to unwrap an inner request while
    /// still answering the outer one.
    pub fn rekey(&self, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
            responder: Arc::clone(&self.responder),
        }
    }
}

impl fmt::Debug for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEvent")
            .field("key", &self.key)
            .field("message", &self.message)
            .field("answered", &self.is_answered())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ConnectionEvent
// ---------------------------------------------------------------------------

/// A newly connected peer.
///
/// The socket does not receive anything until some listener calls
/// [`accept`](Self::accept); until then the layer below holds back inbound
/// traffic. Clones share the accept hook, which runs at most once.
pub struct ConnectionEvent<S> {
    socket: S,
    on_accept: Arc<Mutex<Option<AcceptHook>>>,
}

impl<S: Clone> Clone for ConnectionEvent<S> {
    fn clone(&self) -> Self {
        Self {
            socket: self.socket.clone(),
            on_accept: Arc::clone(&self.on_accept),
        }
    }
}

impl<S> ConnectionEvent<S> {
    /// Creates an event that runs `on_accept` when first accepted.
    pub fn new(socket: S, on_accept: impl FnOnce() + Send + 'static) -> Self {
        Self {
            socket,
            on_accept: Arc::new(Mutex::new(Some(Box::new(on_accept)))),
        }
    }

    /// Creates an event for a socket that is already live.
    pub fn ready(socket: S) -> Self {
        Self {
            socket,
            on_accept: Arc::new(Mutex::new(None)),
        }
    }

    /// Looks at the socket without committing to it.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Commits to the connection and returns its socket.
    pub fn accept(self) -> S {
        let hook = lock(&self.on_accept).take();
        if let Some(hook) = hook {
            hook();
        }
        self.socket
    }
}

impl<S: fmt::Debug> fmt::Debug for ConnectionEvent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvent")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}
