//! The session manager: turns raw connections into sessions.
//!
//! It sits between a raw [`NetworkLayer`] and the application. Every raw
//! connection is accepted immediately and gets one request handler that
//! looks at the key:
//!
//! | Key                | Meaning                                          |
//! |--------------------|--------------------------------------------------|
//! | `register`         | "give me an identity" (idempotent per connection) |
//! | `login`            | "I am this identity, resume my session here"     |
//! | anything else      | application traffic for the session of this connection |
//!
//! Upstream sees only sessions: the manager is itself a [`NetworkLayer`]
//! whose sockets are [`Session`]s, announced once per identity.
//!
//! # Routing
//!
//! Application traffic is bound to the connection that delivered it. A
//! message is dispatched only to the session currently bound to that
//! connection, and only if its key names that session's identity. Knowing
//! someone else's identity is not enough to speak for them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tether_network::{ConnectionEvent, ConnectionListener, NetworkLayer, RequestEvent, Socket};
use tether_protocol::{DelimitedCodec, Identity, LOGIN_KEY, REGISTER_KEY};

use crate::{lock, Session, SessionConfig, SessionError, SessionRegistry, UnknownLoginPolicy};

/// Produces identities for new sessions.
pub type IdentityGenerator = Arc<dyn Fn() -> Identity + Send + Sync>;

struct Shared<N: NetworkLayer> {
    network: N,
    config: SessionConfig,
    codec: DelimitedCodec,
    registry: SessionRegistry<N::Socket>,
    mint: IdentityGenerator,
    listeners: Mutex<Vec<ConnectionListener<Session<N::Socket>>>>,
    listening: AtomicBool,
}

/// Multiplexes register/login control traffic and session-addressed
/// application traffic over a raw [`NetworkLayer`].
pub struct SessionManager<N: NetworkLayer> {
    shared: Arc<Shared<N>>,
}

impl<N: NetworkLayer> Clone for SessionManager<N> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Builder for [`SessionManager`].
///
/// ```rust,no_run
/// # use tether_network::FramedLayer;
/// # use tether_session::{SessionConfig, SessionManager};
/// # use tether_transport::MemoryTransport;
/// # fn demo() -> Result<(), tether_session::SessionError> {
/// let (transport, _connector) = MemoryTransport::new();
/// let sessions = SessionManager::builder(FramedLayer::new(transport))
///     .config(SessionConfig::default())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManagerBuilder<N: NetworkLayer> {
    network: N,
    config: SessionConfig,
    registry: Option<SessionRegistry<N::Socket>>,
    mint: IdentityGenerator,
}

impl<N: NetworkLayer> SessionManagerBuilder<N> {
    /// Sets the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses an existing registry instead of a fresh one.
    pub fn registry(mut self, registry: SessionRegistry<N::Socket>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the random identity generator.
    ///
    /// Identities must stay unique; this exists for fixtures and tests.
    pub fn identity_generator(
        mut self,
        mint: impl Fn() -> Identity + Send + Sync + 'static,
    ) -> Self {
        self.mint = Arc::new(mint);
        self
    }

    /// Builds the manager.
    ///
    /// # Errors
    /// [`SessionError::Protocol`] if the configured delimiter is unusable.
    pub fn build(self) -> Result<SessionManager<N>, SessionError> {
        let codec = DelimitedCodec::new(self.config.delimiter)?;
        Ok(SessionManager {
            shared: Arc::new(Shared {
                network: self.network,
                config: self.config,
                codec,
                registry: self.registry.unwrap_or_default(),
                mint: self.mint,
                listeners: Mutex::new(Vec::new()),
                listening: AtomicBool::new(false),
            }),
        })
    }
}

impl<N: NetworkLayer> SessionManager<N> {
    /// Starts building a manager over `network`.
    pub fn builder(network: N) -> SessionManagerBuilder<N> {
        SessionManagerBuilder {
            network,
            config: SessionConfig::default(),
            registry: None,
            mint: Arc::new(Identity::generate),
        }
    }

    /// Shorthand for `builder(network).config(config).build()`.
    pub fn new(network: N, config: SessionConfig) -> Result<Self, SessionError> {
        Self::builder(network).config(config).build()
    }

    /// The registry this manager owns.
    pub fn registry(&self) -> SessionRegistry<N::Socket> {
        self.shared.registry.clone()
    }

    /// The underlying raw network layer.
    pub fn network(&self) -> &N {
        &self.shared.network
    }
}

impl<N: NetworkLayer> Shared<N> {
    fn handle_raw(&self, socket: &N::Socket, event: RequestEvent) {
        match event.key() {
            REGISTER_KEY => self.register(socket, &event),
            LOGIN_KEY => self.login(socket, &event),
            _ => self.route(socket, &event),
        }
    }

    fn register(&self, socket: &N::Socket, event: &RequestEvent) {
        if let Some(session) = self.registry.bound_to(socket.id()) {
            tracing::debug!(identity = %session.identity(), conn_id = %socket.id(), "already registered");
            event.respond(session.identity().as_str());
            return;
        }
        self.create_session(socket, event);
    }

    fn create_session(&self, socket: &N::Socket, event: &RequestEvent) {
        let identity = (self.mint)();
        let session = Session::new(
            identity.clone(),
            socket.clone(),
            self.codec,
            self.config.max_outstanding,
        );
        self.registry.insert(session.clone());
        tracing::info!(%identity, conn_id = %socket.id(), "session created");

        let listeners = lock(&self.listeners).clone();
        let opener = session.clone();
        let announced = ConnectionEvent::new(session, move || opener.open());
        for listener in &listeners {
            listener(announced.clone());
        }

        event.respond(identity.as_str());
    }

    fn login(&self, socket: &N::Socket, event: &RequestEvent) {
        let identity = Identity::from(event.message());
        // A connection carries one session; it cannot switch to another.
        if let Some(current) = self.registry.bound_to(socket.id()) {
            if current.identity() != &identity {
                tracing::warn!(
                    identity = %current.identity(),
                    conn_id = %socket.id(),
                    requested = %identity,
                    "dropping login for another identity on a bound connection"
                );
                return;
            }
        }
        match self.registry.get(&identity) {
            Some(session) => {
                self.registry.rebind(&session, socket.clone());
                tracing::info!(%identity, conn_id = %socket.id(), "session rebound");
                event.respond(identity.as_str());
                session.replay_outstanding();
            }
            None => match self.config.unknown_login {
                UnknownLoginPolicy::Ignore => {
                    tracing::debug!(%identity, conn_id = %socket.id(), "ignoring login for unknown identity");
                }
                UnknownLoginPolicy::Reject => {
                    tracing::debug!(%identity, conn_id = %socket.id(), "rejecting login for unknown identity");
                    event.respond("");
                }
                UnknownLoginPolicy::Register => {
                    tracing::debug!(%identity, conn_id = %socket.id(), "registering on unknown login");
                    self.create_session(socket, event);
                }
            },
        }
    }

    fn route(&self, socket: &N::Socket, event: &RequestEvent) {
        let Some(session) = self.registry.bound_to(socket.id()) else {
            tracing::debug!(conn_id = %socket.id(), key = event.key(), "dropping message from unregistered connection");
            return;
        };
        if session.identity().as_str() != event.key() {
            tracing::warn!(
                identity = %session.identity(),
                conn_id = %socket.id(),
                key = event.key(),
                "dropping message addressed to another identity"
            );
            return;
        }
        session.dispatch_inbound(event);
    }
}

impl<N: NetworkLayer> NetworkLayer for SessionManager<N> {
    type Socket = Session<N::Socket>;

    fn listen(&self) {
        if self.shared.listening.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak: Weak<Shared<N>> = Arc::downgrade(&self.shared);
        self.shared
            .network
            .add_connection_listener(Arc::new(move |event: ConnectionEvent<N::Socket>| {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                // Listen before accepting so the first frame is not missed.
                let socket = event.socket().clone();
                let handler_shared = Arc::downgrade(&shared);
                event.socket().add_request_listener(Arc::new(move |request: RequestEvent| {
                    if let Some(shared) = handler_shared.upgrade() {
                        shared.handle_raw(&socket, request);
                    }
                }));
                event.accept();
            }));
        self.shared.network.listen();
    }

    fn add_connection_listener(&self, listener: ConnectionListener<Session<N::Socket>>) {
        lock(&self.shared.listeners).push(listener);
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the control-key handling, driven by hand-built
    //! request events on recording sockets.

    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::session::tests::RecordingSocket;

    /// A network layer that never produces connections; the tests call
    /// the handlers directly.
    struct NoNetwork;

    impl NetworkLayer for NoNetwork {
        type Socket = RecordingSocket;
        fn listen(&self) {}
        fn add_connection_listener(&self, _listener: ConnectionListener<RecordingSocket>) {}
    }

    fn manager(config: SessionConfig) -> SessionManager<NoNetwork> {
        let counter = Arc::new(AtomicUsize::new(0));
        SessionManager::builder(NoNetwork)
            .config(config)
            .identity_generator(move || {
                Identity::from(format!("id-{}", counter.fetch_add(1, Ordering::SeqCst)))
            })
            .build()
            .unwrap()
    }

    /// Sends `key`/`message` as if it arrived on `socket`; returns the reply.
    fn send(
        mgr: &SessionManager<NoNetwork>,
        socket: &RecordingSocket,
        key: &str,
        message: &str,
    ) -> Option<String> {
        let reply = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&reply);
        let event = RequestEvent::new(key, message, move |r| *lock(&sink) = Some(r));
        mgr.shared.handle_raw(socket, event);
        let reply = lock(&reply).take();
        reply
    }

    #[test]
    fn test_register_twice_same_connection_returns_same_identity() {
        let mgr = manager(SessionConfig::default());
        let socket = RecordingSocket::new();

        let first = send(&mgr, &socket, REGISTER_KEY, "");
        let second = send(&mgr, &socket, REGISTER_KEY, "");

        assert_eq!(first.as_deref(), Some("id-0"));
        assert_eq!(first, second);
        assert_eq!(mgr.registry().len(), 1);
    }

    #[test]
    fn test_register_announces_session_once() {
        let mgr = manager(SessionConfig::default());
        let announced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&announced);
        mgr.add_connection_listener(Arc::new(move |_event: ConnectionEvent<Session<RecordingSocket>>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let socket = RecordingSocket::new();

        send(&mgr, &socket, REGISTER_KEY, "");
        send(&mgr, &socket, REGISTER_KEY, "");

        assert_eq!(announced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_login_known_identity_rebinds() {
        let mgr = manager(SessionConfig::default());
        let first = RecordingSocket::new();
        let identity = send(&mgr, &first, REGISTER_KEY, "").unwrap();

        let second = RecordingSocket::new();
        let reply = send(&mgr, &second, LOGIN_KEY, &identity);

        assert_eq!(reply.as_deref(), Some(identity.as_str()));
        let session = mgr.registry().get(&Identity::from(identity)).unwrap();
        assert_eq!(session.binding().id(), second.id());
        assert!(mgr.registry().bound_to(first.id()).is_none());
    }

    #[test]
    fn test_login_from_connection_bound_to_other_identity_is_dropped() {
        let mgr = manager(SessionConfig::default());
        let a = RecordingSocket::new();
        let b = RecordingSocket::new();
        let x = send(&mgr, &a, REGISTER_KEY, "").unwrap();
        let y = send(&mgr, &b, REGISTER_KEY, "").unwrap();

        let reply = send(&mgr, &a, LOGIN_KEY, &y);

        assert_eq!(reply, None);
        let registry = mgr.registry();
        assert_eq!(registry.get(&Identity::from(x.as_str())).unwrap().binding().id(), a.id());
        assert_eq!(registry.get(&Identity::from(y.as_str())).unwrap().binding().id(), b.id());
        assert_eq!(registry.bound_to(a.id()).unwrap().identity().as_str(), x);
        assert_eq!(registry.bound_to(b.id()).unwrap().identity().as_str(), y);
        assert_eq!(send(&mgr, &a, REGISTER_KEY, "").as_deref(), Some(x.as_str()));
    }

    #[test]
    fn test_login_same_identity_on_bound_connection_is_acknowledged() {
        let mgr = manager(SessionConfig::default());
        let socket = RecordingSocket::new();
        let identity = send(&mgr, &socket, REGISTER_KEY, "").unwrap();

        let reply = send(&mgr, &socket, LOGIN_KEY, &identity);

        assert_eq!(reply.as_deref(), Some(identity.as_str()));
        assert_eq!(mgr.registry().bound_to(socket.id()).unwrap().identity().as_str(), identity);
    }

    #[test]
    fn test_login_unknown_identity_from_bound_connection_does_not_register() {
        let mgr = manager(SessionConfig {
            unknown_login: UnknownLoginPolicy::Register,
            ..SessionConfig::default()
        });
        let socket = RecordingSocket::new();
        send(&mgr, &socket, REGISTER_KEY, "");

        let reply = send(&mgr, &socket, LOGIN_KEY, "ghost");

        assert_eq!(reply, None);
        assert_eq!(mgr.registry().len(), 1);
    }

    #[test]
    fn test_login_unknown_identity_ignored_by_default() {
        let mgr = manager(SessionConfig::default());

        let reply = send(&mgr, &RecordingSocket::new(), LOGIN_KEY, "ghost");

        assert_eq!(reply, None);
        assert!(mgr.registry().is_empty());
    }

    #[test]
    fn test_login_unknown_identity_rejected_with_empty_reply() {
        let mgr = manager(SessionConfig {
            unknown_login: UnknownLoginPolicy::Reject,
            ..SessionConfig::default()
        });

        let reply = send(&mgr, &RecordingSocket::new(), LOGIN_KEY, "ghost");

        assert_eq!(reply.as_deref(), Some(""));
        assert!(mgr.registry().is_empty());
    }

    #[test]
    fn test_login_unknown_identity_registers_fresh_one() {
        let mgr = manager(SessionConfig {
            unknown_login: UnknownLoginPolicy::Register,
            ..SessionConfig::default()
        });

        let reply = send(&mgr, &RecordingSocket::new(), LOGIN_KEY, "ghost");

        assert_eq!(reply.as_deref(), Some("id-0"));
        assert!(mgr.registry().get(&Identity::from("ghost")).is_none());
        assert_eq!(mgr.registry().len(), 1);
    }

    #[test]
    fn test_message_for_other_identity_is_dropped() {
        let mgr = manager(SessionConfig::default());
        let alice = RecordingSocket::new();
        let bob = RecordingSocket::new();
        send(&mgr, &alice, REGISTER_KEY, "");
        send(&mgr, &bob, REGISTER_KEY, "");

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let alice_session = mgr.registry().get(&Identity::from("id-0")).unwrap();
        alice_session.add_request_listener(Arc::new(move |_event: RequestEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        alice_session.open();

        // Bob's connection addresses Alice's identity.
        send(&mgr, &bob, "id-0", "move|x");
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        // Alice's own connection gets through.
        send(&mgr, &alice, "id-0", "move|x");
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_message_from_unregistered_connection_is_dropped() {
        let mgr = manager(SessionConfig::default());
        send(&mgr, &RecordingSocket::new(), REGISTER_KEY, "");

        let reply = send(&mgr, &RecordingSocket::new(), "id-0", "move|x");

        assert_eq!(reply, None);
    }

    #[test]
    fn test_invalid_delimiter_fails_to_build() {
        let result = SessionManager::new(
            NoNetwork,
            SessionConfig {
                delimiter: '\\',
                ..SessionConfig::default()
            },
        );
        assert!(matches!(result, Err(SessionError::Protocol(_))));
    }
}
