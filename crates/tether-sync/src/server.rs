//! The server half: tracks clients, pushes state, asks questions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;

use tether_future::{Cancelable, FutureError};
use tether_network::{ConnectionEvent, NetworkLayer, Socket};
use tether_protocol::{SYNC_REQUEST_KEY, SYNC_UPDATE_KEY};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::lock;
use crate::payload::SyncEvent;
use crate::remote::call_fields;

/// Keeps every client of a [`NetworkLayer`] and talks to them with
/// `syncUpdate` / `syncRequest`.
///
/// Clients are tracked in join order. With a session layer underneath, a
/// client that reconnects keeps its slot: the session manager announces
/// each identity once.
pub struct SyncServer<N: NetworkLayer> {
    shared: Arc<Shared<N>>,
}

struct Shared<N: NetworkLayer> {
    network: N,
    config: SyncConfig,
    clients: Mutex<Vec<N::Socket>>,
    joined: watch::Sender<usize>,
    listening: AtomicBool,
}

impl<N: NetworkLayer> Clone for SyncServer<N> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<N: NetworkLayer> SyncServer<N> {
    /// Wraps `network`. Clients are not tracked until [`listen`](Self::listen).
    pub fn new(network: N, config: SyncConfig) -> Self {
        let (joined, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                network,
                config,
                clients: Mutex::new(Vec::new()),
                joined,
                listening: AtomicBool::new(false),
            }),
        }
    }

    /// The layer clients arrive on.
    pub fn network(&self) -> &N {
        &self.shared.network
    }

    /// The reply timeout and other settings this server was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Starts tracking clients and starts the network listening. Calling
    /// it again is a no-op.
    pub fn listen(&self) {
        if self.shared.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = Arc::downgrade(&self.shared);
        self.shared
            .network
            .add_connection_listener(Arc::new(move |event: ConnectionEvent<N::Socket>| {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let socket = event.accept();
                let count = {
                    let mut clients = lock(&shared.clients);
                    clients.push(socket.clone());
                    clients.len()
                };
                tracing::info!(client = %socket.id(), clients = count, "sync client joined");
                shared.joined.send_replace(count);
            }));
        self.shared.network.listen();
    }

    /// A snapshot of the clients, in join order.
    pub fn clients(&self) -> Vec<N::Socket> {
        lock(&self.shared.clients).clone()
    }

    /// How many clients have joined so far.
    pub fn client_count(&self) -> usize {
        lock(&self.shared.clients).len()
    }

    /// Waits until at least `count` clients have joined and returns them.
    pub async fn wait_for_clients(&self, count: usize) -> Vec<N::Socket> {
        let mut joined = self.shared.joined.subscribe();
        loop {
            if *joined.borrow_and_update() >= count {
                break;
            }
            // The sender lives as long as `self`.
            if joined.changed().await.is_err() {
                break;
            }
        }
        self.clients()
    }

    /// Pushes `state` to one client. Settles once the client has applied it.
    pub fn update(&self, client: &N::Socket, state: &str) -> Cancelable<()> {
        client.request(SYNC_UPDATE_KEY, state).chain(|_| ())
    }

    /// Asks one client a question about `state`. `fields` ride along next
    /// to the state and are opaque to the sync layer.
    pub fn request(
        &self,
        client: &N::Socket,
        state: &str,
        fields: Map<String, Value>,
    ) -> Cancelable<String> {
        let payload = SyncEvent::with_fields(state, fields);
        match serde_json::to_string(&payload) {
            Ok(payload) => client.request(SYNC_REQUEST_KEY, &payload),
            Err(e) => Cancelable::failed(FutureError::rejected(e.to_string())),
        }
    }

    /// Calls a method registered in the client's
    /// [`RemoteTable`](crate::RemoteTable) and decodes its result. Bounded
    /// by the reply timeout.
    pub async fn call<A, T>(
        &self,
        client: &N::Socket,
        state: &str,
        method: &str,
        args: A,
    ) -> Result<T, SyncError>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let fields = call_fields(method, serde_json::to_value(args)?);
        let timeout = self.shared.config.reply_timeout_ms;
        let reply = self
            .request(client, state, fields)
            .with_timeout(timeout)
            .await?
            .ok_or(SyncError::TimedOut(timeout))?;
        Ok(serde_json::from_str(&reply)?)
    }

    /// Pushes `state` to every client and returns how many applied it
    /// within the reply timeout.
    pub async fn broadcast_update(&self, state: &str) -> usize {
        let clients = self.clients();
        let timeout = self.shared.config.reply_timeout_ms;
        let acks = join_all(
            clients
                .iter()
                .map(|client| self.update(client, state).with_timeout(timeout)),
        )
        .await;

        acks.into_iter()
            .zip(&clients)
            .filter(|(ack, client)| match ack {
                Ok(Some(())) => true,
                Ok(None) => {
                    tracing::debug!(client = %client.id(), "state update timed out");
                    false
                }
                Err(e) => {
                    tracing::debug!(client = %client.id(), error = %e, "state update failed");
                    false
                }
            })
            .count()
    }

    /// Asks every client the same question and returns the replies in
    /// client order. `None` marks a client that failed or did not answer
    /// within the reply timeout.
    pub async fn collect(&self, state: &str, fields: Map<String, Value>) -> Vec<Option<String>> {
        let clients = self.clients();
        let timeout = self.shared.config.reply_timeout_ms;
        let replies = join_all(
            clients
                .iter()
                .map(|client| self.request(client, state, fields.clone()).with_timeout(timeout)),
        )
        .await;

        replies
            .into_iter()
            .zip(&clients)
            .map(|(reply, client)| match reply {
                Ok(reply) => {
                    if reply.is_none() {
                        tracing::debug!(client = %client.id(), "sync reply timed out");
                    }
                    reply
                }
                Err(e) => {
                    tracing::debug!(client = %client.id(), error = %e, "sync request failed");
                    None
                }
            })
            .collect()
    }
}
