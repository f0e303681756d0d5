//! In-process transport built on Tokio channels.
//!
//! A [`MemoryTransport`] plays the listening side; its [`MemoryConnector`]
//! dials it. Each dial produces a linked pair of [`MemoryConnection`]s:
//! bytes sent on one end arrive on the other, in order.
//!
//! Closing either end takes the whole link down. After that the peer's
//! `recv` yields `None` (once it has drained what was already delivered)
//! and its `send` fails with [`TransportError::Closed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, watch};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// The listening half of the in-memory transport.
pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
    shut_down: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Creates a transport together with the connector that dials it.
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let shut_down = Arc::new(AtomicBool::new(false));
        let connector = MemoryConnector {
            tx,
            shut_down: Arc::clone(&shut_down),
        };
        (
            Self {
                incoming,
                shut_down,
            },
            connector,
        )
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let conn = self.incoming.recv().await.ok_or(TransportError::Shutdown)?;
        tracing::debug!(id = %conn.id, "accepted in-memory connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.shut_down.store(true, Ordering::Release);
        Ok(())
    }
}

/// Dials a [`MemoryTransport`]. Cheap to clone.
#[derive(Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<MemoryConnection>,
    shut_down: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Opens a new link and returns the client end.
    ///
    /// The server end is queued for the transport's next `accept`.
    ///
    /// # Errors
    /// [`TransportError::Shutdown`] once the transport is shut down or
    /// dropped.
    pub fn connect(&self) -> Result<MemoryConnection, TransportError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let (client, server) = MemoryConnection::pair();
        self.tx
            .send(server)
            .map_err(|_| TransportError::Shutdown)?;
        Ok(client)
    }
}

/// One end of an in-memory link.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// `true` once either end has closed.
    link: Arc<watch::Sender<bool>>,
}

impl MemoryConnection {
    /// Creates two connected ends without going through a transport.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let (link, _) = watch::channel(false);
        let link = Arc::new(link);

        let a = Self {
            id: ConnectionId::next(),
            tx: a_tx,
            rx: Mutex::new(a_rx),
            link: Arc::clone(&link),
        };
        let b = Self {
            id: ConnectionId::next(),
            tx: b_tx,
            rx: Mutex::new(b_rx),
            link,
        };
        (a, b)
    }

    fn is_down(&self) -> bool {
        *self.link.borrow()
    }
}

/// Resolves once the link is marked down.
async fn link_down(mut link: watch::Receiver<bool>) {
    loop {
        if *link.borrow_and_update() {
            return;
        }
        if link.changed().await.is_err() {
            return;
        }
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.is_down() {
            return Err(TransportError::Closed(self.id));
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| TransportError::Closed(self.id))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut rx = self.rx.lock().await;
        let down = link_down(self.link.subscribe());
        tokio::select! {
            biased;
            data = rx.recv() => Ok(data),
            () = down => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if !self.link.send_replace(true) {
            tracing::debug!(id = %self.id, "in-memory link closed");
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_bytes_in_order() {
        let (a, b) = MemoryConnection::pair();

        a.send(b"one").await.unwrap();
        a.send(b"two").await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(b.recv().await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_close_ends_peer_recv_and_send() {
        let (a, b) = MemoryConnection::pair();

        a.close().await.unwrap();

        assert_eq!(b.recv().await.unwrap(), None);
        assert!(matches!(
            b.send(b"late").await,
            Err(TransportError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_recv() {
        let (a, b) = MemoryConnection::pair();
        let b = Arc::new(b);
        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.recv().await })
        };

        tokio::task::yield_now().await;
        a.close().await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_drop_ends_peer_recv() {
        let (a, b) = MemoryConnection::pair();
        drop(a);
        assert_eq!(b.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_connector_queues_server_end_for_accept() {
        let (mut transport, connector) = MemoryTransport::new();

        let client = connector.connect().unwrap();
        let server = transport.accept().await.unwrap();
        assert_ne!(client.id(), server.id());

        client.send(b"hi").await.unwrap();
        assert_eq!(server.recv().await.unwrap(), Some(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_fails() {
        let (transport, connector) = MemoryTransport::new();
        transport.shutdown().await.unwrap();

        assert!(matches!(
            connector.connect(),
            Err(TransportError::Shutdown)
        ));
    }
}
