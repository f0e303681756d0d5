//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Server-side and client-side connections share one type: accepted TCP
//! streams are wrapped in `MaybeTlsStream::Plain`, which is what
//! `connect_async` hands back on the client side.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn io_error(kind: io::ErrorKind, e: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(kind, e)
}

/// Accepts WebSocket upgrades on a TCP listener.
pub struct WebSocketTransport {
    listener: TcpListener,
    shut_down: AtomicBool,
}

impl WebSocketTransport {
    /// Binds `addr`, e.g. `"0.0.0.0:8080"` or `"127.0.0.1:0"`.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::Bind {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "websocket listener bound");
        Ok(Self {
            listener,
            shut_down: AtomicBool::new(false),
        })
    }

    /// The bound address; tells tests which port `:0` picked.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;

        let ws = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
            .await
            .map_err(|e| {
                TransportError::Accept(io_error(io::ErrorKind::ConnectionRefused, e))
            })?;

        let conn = WebSocketConnection::from_stream(ws);
        tracing::debug!(id = %conn.id, %addr, "accepted WebSocket connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A single WebSocket connection.
///
/// Sink and stream halves are locked separately so a pending `recv` never
/// blocks a concurrent `send`.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    /// Dials a WebSocket server, e.g. `ws://127.0.0.1:8080`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) =
            tokio_tungstenite::connect_async(url).await.map_err(|e| {
                TransportError::Connect {
                    url: url.to_string(),
                    source: io_error(io::ErrorKind::ConnectionRefused, e),
                }
            })?;
        let conn = Self::from_stream(ws);
        tracing::debug!(id = %conn.id, url, "connected WebSocket");
        Ok(conn)
    }

    fn from_stream(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::next(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::Send {
                id: self.id,
                source: io_error(io::ErrorKind::BrokenPipe, e),
            }
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::Receive {
                        id: self.id,
                        source: io_error(io::ErrorKind::ConnectionReset, e),
                    });
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::Send {
                id: self.id,
                source: io_error(io::ErrorKind::BrokenPipe, e),
            }
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
