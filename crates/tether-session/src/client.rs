//! The client side of the session protocol.
//!
//! A [`SessionClient`] wraps a raw [`Socket`] and hides the register/login
//! handshake. After a network drop, hand it a fresh socket with
//! [`reconnect`](SessionClient::reconnect): it logs in under the same
//! identity, and the server replays whatever it was still waiting on.

use std::fmt;
use std::sync::{Arc, Mutex};

use tether_future::{Cancelable, FutureError};
use tether_network::{RequestEvent, RequestListener, Socket};
use tether_protocol::{
    is_reserved, DelimitedCodec, Identity, KeyedCodec, LOGIN_KEY, REGISTER_KEY,
};
use tether_transport::ConnectionId;

use crate::{lock, ClientConfig, SessionError};

/// Server-initiated traffic: unpacked and fanned out to the listeners.
///
/// Kept apart from the client state so raw sockets can hold it without
/// holding the client.
struct Inbound {
    codec: DelimitedCodec,
    listeners: Mutex<Vec<RequestListener>>,
}

impl Inbound {
    fn deliver(&self, raw: RequestEvent) {
        let Some((key, message)) = self.codec.deserialize(raw.message()) else {
            tracing::debug!(token = raw.key(), "dropping undecodable server request");
            return;
        };
        let event = raw.rekey(key, message);
        let listeners = lock(&self.listeners).clone();
        for listener in &listeners {
            listener(event.clone());
        }
    }

    fn attach<S: Socket>(self: &Arc<Self>, socket: &S) {
        let inbound = Arc::clone(self);
        socket.add_request_listener(Arc::new(move |event: RequestEvent| inbound.deliver(event)));
    }
}

struct Shared<S> {
    id: ConnectionId,
    identity: Identity,
    config: ClientConfig,
    inbound: Arc<Inbound>,
    socket: Mutex<S>,
}

/// A client's view of its session. Cheap to clone.
pub struct SessionClient<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for SessionClient<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Socket> SessionClient<S> {
    /// Establishes a session over `socket`.
    ///
    /// With a known `identity` the client first tries to log in (bounded by
    /// [`ClientConfig::login_timeout_ms`]); if that is refused or times
    /// out it registers for a new identity instead.
    ///
    /// # Errors
    /// - [`SessionError::Protocol`] for an unusable delimiter
    /// - [`SessionError::Handshake`] if `register` was not answered
    /// - [`SessionError::RegistrationRefused`] for an empty identity
    pub async fn connect(
        socket: S,
        identity: Option<Identity>,
        config: ClientConfig,
    ) -> Result<Self, SessionError> {
        let inbound = Arc::new(Inbound {
            codec: DelimitedCodec::new(config.delimiter)?,
            listeners: Mutex::new(Vec::new()),
        });
        // Replays may follow the login reply immediately.
        inbound.attach(&socket);

        let identity = handshake(&socket, identity, config.login_timeout_ms).await?;
        tracing::info!(%identity, "session established");

        Ok(Self {
            shared: Arc::new(Shared {
                id: ConnectionId::next(),
                identity,
                config,
                inbound,
                socket: Mutex::new(socket),
            }),
        })
    }

    /// Resumes the session over a fresh socket.
    ///
    /// On success the new socket replaces the old one; listeners carry
    /// over.
    ///
    /// # Errors
    /// - [`SessionError::LoginRejected`] if the server refused the identity
    /// - [`SessionError::LoginTimedOut`] if it did not answer in time
    /// - [`SessionError::Handshake`] if the login request failed outright
    pub async fn reconnect(&self, socket: S) -> Result<(), SessionError> {
        let identity = &self.shared.identity;
        self.shared.inbound.attach(&socket);

        let reply = socket
            .request(LOGIN_KEY, identity.as_str())
            .with_timeout(self.shared.config.login_timeout_ms)
            .await?;

        match reply {
            Some(reply) if reply == identity.as_str() => {
                *lock(&self.shared.socket) = socket;
                tracing::info!(%identity, "session resumed");
                Ok(())
            }
            Some(_) => Err(SessionError::LoginRejected(identity.clone())),
            None => Err(SessionError::LoginTimedOut(identity.clone())),
        }
    }

    /// The identity the server issued.
    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// The raw socket currently in use.
    pub fn socket(&self) -> S {
        lock(&self.shared.socket).clone()
    }
}

/// Logs in when an identity is known, falling back to `register`.
async fn handshake<S: Socket>(
    socket: &S,
    known: Option<Identity>,
    login_timeout_ms: i64,
) -> Result<Identity, SessionError> {
    if let Some(identity) = known {
        let reply = socket
            .request(LOGIN_KEY, identity.as_str())
            .with_timeout(login_timeout_ms)
            .await?;
        match reply {
            Some(reply) if !reply.is_empty() => return Ok(Identity::from(reply)),
            Some(_) => tracing::debug!(%identity, "login refused, registering"),
            None => tracing::debug!(%identity, "login timed out, registering"),
        }
    }

    let reply = socket.request(REGISTER_KEY, "").await?;
    if reply.is_empty() {
        return Err(SessionError::RegistrationRefused);
    }
    Ok(Identity::from(reply))
}

impl<S: Socket> Socket for SessionClient<S> {
    /// Sends application traffic to the server, addressed by this
    /// client's identity. Reserved keys are refused without sending.
    fn request(&self, key: &str, message: &str) -> Cancelable<String> {
        if is_reserved(key) {
            tracing::warn!(identity = %self.shared.identity, key, "refusing reserved key");
            return Cancelable::failed(FutureError::rejected(
                SessionError::ReservedKey(key.to_string()).to_string(),
            ));
        }
        let wire = self.shared.inbound.codec.serialize(key, message);
        self.socket().request(self.shared.identity.as_str(), &wire)
    }

    fn add_request_listener(&self, listener: RequestListener) {
        lock(&self.shared.inbound.listeners).push(listener);
    }

    fn id(&self) -> ConnectionId {
        self.shared.id
    }
}

impl<S> fmt::Debug for SessionClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("identity", &self.shared.identity)
            .finish_non_exhaustive()
    }
}
