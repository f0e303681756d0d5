//! Request/response correlation over one byte connection.
//!
//! Each [`FramedSocket`] owns two Tokio tasks:
//!
//! ```text
//!            ┌──────────── writer task ◄── outbound queue ◄── request()/respond()
//! Connection ┤
//!            └──────────── reader task ──► Response → pending table → Resolver
//!                                      └─► Request  → RequestEvent → listeners
//! ```
//!
//! The reader does not start until the socket is accepted, so a peer's
//! first requests are never delivered to a socket nobody listens on.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use tether_future::Cancelable;
use tether_protocol::{Codec, Frame, JsonCodec, RequestToken};
use tether_transport::{Connection, ConnectionId, TransportError};

use crate::pending::PendingRequests;
use crate::{lock, NetworkError, RequestEvent, RequestListener, Socket};

enum Outbound {
    Frame(Frame),
    Close,
}

struct Shared {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: Mutex<PendingRequests>,
    listeners: Mutex<Vec<RequestListener>>,
}

/// A [`Socket`] speaking JSON [`Frame`]s over a [`Connection`].
#[derive(Clone)]
pub struct FramedSocket {
    shared: Arc<Shared>,
}

impl FramedSocket {
    /// Wraps a client-side connection. The socket is live immediately.
    ///
    /// Requires a Tokio runtime.
    pub fn connect<C>(conn: C) -> Self
    where
        C: Connection<Error = TransportError>,
    {
        let (socket, gate) = Self::spawn(conn);
        let _ = gate.send(());
        socket
    }

    /// Wraps a connection without reading from it yet.
    ///
    /// Sending on the returned gate starts the reader; dropping it closes
    /// the connection.
    pub(crate) fn spawn<C>(conn: C) -> (Self, oneshot::Sender<()>)
    where
        C: Connection<Error = TransportError>,
    {
        let (outbound, queue) = mpsc::unbounded_channel();
        let (gate, opened) = oneshot::channel();
        let shared = Arc::new(Shared {
            id: conn.id(),
            outbound,
            pending: Mutex::new(PendingRequests::new()),
            listeners: Mutex::new(Vec::new()),
        });
        let conn = Arc::new(conn);

        tokio::spawn(write_loop(Arc::clone(&conn), queue));
        tokio::spawn(read_loop(conn, Arc::clone(&shared), opened));

        (Self { shared }, gate)
    }

    /// Closes the connection. Pending requests are rejected right away.
    pub fn close(&self) {
        self.shared.shutdown();
    }

    /// Returns `true` once the connection is closed from either side.
    pub fn is_closed(&self) -> bool {
        !lock(&self.shared.pending).is_open()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_len(&self) -> usize {
        lock(&self.shared.pending).len()
    }
}

impl Socket for FramedSocket {
    fn request(&self, key: &str, message: &str) -> Cancelable<String> {
        let id = RequestToken::generate();
        let (future, resolver) = Cancelable::pair();

        let weak = Arc::downgrade(&self.shared);
        let token = id.clone();
        resolver.on_cancel(move || {
            if let Some(shared) = weak.upgrade() {
                lock(&shared.pending).take(&token);
            }
        });

        let refused = lock(&self.shared.pending)
            .register(id.clone(), resolver)
            .err();
        if let Some(resolver) = refused {
            resolver.reject(NetworkError::Closed.to_string());
            return future;
        }

        tracing::trace!(conn_id = %self.shared.id, token = %id, key, "sending request");
        let frame = Frame::Request {
            id: id.clone(),
            key: key.to_string(),
            message: message.to_string(),
        };
        if self.shared.outbound.send(Outbound::Frame(frame)).is_err() {
            let resolver = lock(&self.shared.pending).take(&id);
            if let Some(resolver) = resolver {
                resolver.reject(NetworkError::Closed.to_string());
            }
        }
        future
    }

    fn add_request_listener(&self, listener: RequestListener) {
        lock(&self.shared.listeners).push(listener);
    }

    fn id(&self) -> ConnectionId {
        self.shared.id
    }
}

impl fmt::Debug for FramedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedSocket")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Shared {
    fn handle_bytes(&self, bytes: &[u8]) {
        let frame: Frame = match JsonCodec.decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(conn_id = %self.id, error = %e, "dropping undecodable frame");
                return;
            }
        };
        tracing::trace!(conn_id = %self.id, token = %frame.id(), "frame received");

        match frame {
            Frame::Response { id, message } => {
                let resolver = lock(&self.pending).take(&id);
                match resolver {
                    Some(resolver) => {
                        resolver.resolve(message);
                    }
                    None => {
                        tracing::debug!(conn_id = %self.id, token = %id, "dropping unmatched response");
                    }
                }
            }
            Frame::Request { id, key, message } => {
                let outbound = self.outbound.clone();
                let event = RequestEvent::new(key, message, move |reply| {
                    let _ = outbound.send(Outbound::Frame(Frame::Response {
                        id,
                        message: reply,
                    }));
                });

                let listeners = lock(&self.listeners).clone();
                if listeners.is_empty() {
                    tracing::debug!(conn_id = %self.id, key = event.key(), "no request listener");
                }
                for listener in &listeners {
                    listener(event.clone());
                }
            }
        }
    }

    /// Refuses new requests, rejects the pending ones, tells the writer to
    /// close the connection and forgets the listeners. Safe to call more
    /// than once.
    fn shutdown(&self) {
        let drained = lock(&self.pending).close();
        if !drained.is_empty() {
            tracing::debug!(conn_id = %self.id, count = drained.len(), "rejecting pending requests");
        }
        let reason = NetworkError::Closed.to_string();
        for resolver in drained {
            resolver.reject(reason.clone());
        }
        let _ = self.outbound.send(Outbound::Close);
        // Listeners often hold a clone of this socket.
        lock(&self.listeners).clear();
    }
}

async fn write_frame<C>(conn: &C, frame: &Frame) -> Result<(), NetworkError>
where
    C: Connection<Error = TransportError>,
{
    let bytes = JsonCodec.encode(frame)?;
    conn.send(&bytes).await?;
    Ok(())
}

async fn write_loop<C>(conn: Arc<C>, mut queue: mpsc::UnboundedReceiver<Outbound>)
where
    C: Connection<Error = TransportError>,
{
    while let Some(item) = queue.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = write_frame(&*conn, &frame).await {
                    tracing::debug!(conn_id = %conn.id(), error = %e, "write failed");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = conn.close().await;
}

async fn read_loop<C>(conn: Arc<C>, shared: Arc<Shared>, opened: oneshot::Receiver<()>)
where
    C: Connection<Error = TransportError>,
{
    if opened.await.is_err() {
        tracing::debug!(conn_id = %shared.id, "connection never accepted");
        shared.shutdown();
        return;
    }

    loop {
        match conn.recv().await {
            Ok(Some(bytes)) => shared.handle_bytes(&bytes),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(conn_id = %shared.id, error = %e, "receive failed");
                break;
            }
        }
    }

    tracing::debug!(conn_id = %shared.id, "connection closed");
    shared.shutdown();
}
