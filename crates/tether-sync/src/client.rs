//! The client half: answers the server's `syncUpdate` and `syncRequest`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use tether_network::{ConnectionEvent, NetworkLayer, RequestEvent, Socket};
use tether_protocol::{SYNC_REQUEST_KEY, SYNC_UPDATE_KEY};

use crate::error::SyncError;
use crate::payload::SyncEvent;

/// Application hooks for a sync client.
///
/// Every `syncRequest` runs `on_update_state` and then `on_request` with the
/// same event, so the responder always answers against the state the
/// server sent alongside the question.
pub trait SyncResponder: Send + Sync + 'static {
    /// Called for every state the server pushes.
    fn on_update_state(
        &self,
        event: &SyncEvent,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Called for every `syncRequest`; the returned string is the reply.
    fn on_request(&self, event: &SyncEvent)
    -> impl Future<Output = Result<String, SyncError>> + Send;
}

/// Routes sync requests arriving on sockets to a [`SyncResponder`].
///
/// Each attached socket gets one queue, drained by one task: requests from
/// a socket are applied strictly in arrival order, and a request's hooks
/// finish before the next request's start. Separate sockets are handled
/// independently.
pub struct SyncClient<R> {
    responder: Arc<R>,
}

impl<R> Clone for SyncClient<R> {
    fn clone(&self) -> Self {
        Self {
            responder: Arc::clone(&self.responder),
        }
    }
}

impl<R: SyncResponder> SyncClient<R> {
    /// Wraps `responder`. Nothing is answered until a socket is attached.
    pub fn new(responder: R) -> Self {
        Self {
            responder: Arc::new(responder),
        }
    }

    /// The responder shared by every attached socket.
    pub fn responder(&self) -> &R {
        &self.responder
    }

    /// Answers sync requests arriving on `socket`.
    ///
    /// Spawns the socket's queue task, so it must be called from within a
    /// Tokio runtime. The task ends once the socket drops its listeners.
    pub fn attach<S: Socket>(&self, socket: &S) {
        let (queue, mut pending) = mpsc::unbounded_channel::<RequestEvent>();
        let responder = Arc::clone(&self.responder);
        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                handle(&*responder, event).await;
            }
        });

        socket.add_request_listener(Arc::new(move |event: RequestEvent| {
            if queue.send(event).is_err() {
                tracing::debug!("sync queue closed, dropping request");
            }
        }));
    }

    /// Answers sync requests on every socket `layer` produces, then starts
    /// the layer listening.
    pub fn listen<N: NetworkLayer>(&self, layer: &N) {
        let client = self.clone();
        layer.add_connection_listener(Arc::new(
            move |event: ConnectionEvent<N::Socket>| {
                client.attach(event.socket());
                event.accept();
            },
        ));
        layer.listen();
    }
}

async fn handle<R: SyncResponder>(responder: &R, event: RequestEvent) {
    match event.key() {
        SYNC_UPDATE_KEY => {
            let update = SyncEvent::new(event.message());
            match responder.on_update_state(&update).await {
                Ok(()) => {
                    event.respond("");
                }
                Err(e) => tracing::warn!(error = %e, "state update failed"),
            }
        }
        SYNC_REQUEST_KEY => {
            let request: SyncEvent = match serde_json::from_str(event.message()) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping invalid sync request");
                    return;
                }
            };
            let reply = async {
                responder.on_update_state(&request).await?;
                responder.on_request(&request).await
            };
            match reply.await {
                Ok(reply) => {
                    event.respond(reply);
                }
                Err(e) => tracing::warn!(error = %e, "sync request failed"),
            }
        }
        other => tracing::debug!(key = other, "ignoring non-sync request"),
    }
}
