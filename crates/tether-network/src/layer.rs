//! [`FramedLayer`]: a [`NetworkLayer`] over any byte [`Transport`].

use std::sync::{Arc, Mutex};

use tether_transport::{Connection, Transport, TransportError};

use crate::{lock, ConnectionEvent, ConnectionListener, FramedSocket, NetworkLayer};

struct LayerShared<T> {
    /// Taken by the accept loop on the first `listen`.
    transport: Mutex<Option<T>>,
    listeners: Mutex<Vec<ConnectionListener<FramedSocket>>>,
}

/// Turns every connection a [`Transport`] accepts into a [`FramedSocket`]
/// and announces it to the connection listeners.
pub struct FramedLayer<T> {
    shared: Arc<LayerShared<T>>,
}

impl<T> Clone for FramedLayer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> FramedLayer<T>
where
    T: Transport<Error = TransportError>,
    T::Connection: Connection<Error = TransportError>,
{
    /// Wraps a transport. Nothing is accepted until [`listen`](NetworkLayer::listen).
    pub fn new(transport: T) -> Self {
        Self {
            shared: Arc::new(LayerShared {
                transport: Mutex::new(Some(transport)),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<T> LayerShared<T> {
    fn announce<C>(&self, conn: C)
    where
        C: Connection<Error = TransportError>,
    {
        let conn_id = conn.id();
        let (socket, gate) = FramedSocket::spawn(conn);
        let event = ConnectionEvent::new(socket, move || {
            let _ = gate.send(());
        });

        let listeners = lock(&self.listeners).clone();
        if listeners.is_empty() {
            tracing::debug!(%conn_id, "no connection listener, dropping connection");
        }
        for listener in &listeners {
            listener(event.clone());
        }
    }
}

impl<T> NetworkLayer for FramedLayer<T>
where
    T: Transport<Error = TransportError>,
    T::Connection: Connection<Error = TransportError>,
{
    type Socket = FramedSocket;

    fn listen(&self) {
        let transport = lock(&self.shared.transport).take();
        let Some(mut transport) = transport else {
            tracing::debug!("already listening");
            return;
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tracing::info!("accepting connections");
            loop {
                match transport.accept().await {
                    Ok(conn) => shared.announce(conn),
                    Err(TransportError::Shutdown) => {
                        tracing::info!("transport shut down, accept loop stopping");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
        });
    }

    fn add_connection_listener(&self, listener: ConnectionListener<FramedSocket>) {
        lock(&self.shared.listeners).push(listener);
    }
}
