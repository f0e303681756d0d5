//! The server-side record of one identity.
//!
//! A [`Session`] outlives the connections it is carried over. It holds:
//! - WHO the client is ([`Identity`])
//! - WHERE it is reachable right now (the bound raw socket)
//! - WHAT we are still waiting on (the outstanding-request ledger)
//!
//! # Lifecycle
//!
//! ```text
//! register ──→ BOUND(conn₁) ──login──→ BOUND(conn₂) ──login──→ BOUND(conn₃) …
//! ```
//!
//! There is no unbound state: a dropped connection leaves the session
//! bound to a dead socket until the client logs in again, at which point
//! every outstanding request is replayed over the new binding.
//!
//! # Wire shape
//!
//! Traffic is nested inside raw requests. The inner `(key, message)` pair
//! is packed with the [`DelimitedCodec`]:
//!
//! ```text
//! client → server   raw key = identity   raw message = pack(key, message)
//! server → client   raw key = token      raw message = pack(key, message)
//! ```
//!
//! Carrying the token as the raw key is what lets a replayed request keep
//! its identity across connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tether_future::{CancelHandle, Cancelable, FutureError, Resolver};
use tether_network::{RequestEvent, RequestListener, Socket};
use tether_protocol::{DelimitedCodec, Identity, KeyedCodec, RequestToken};
use tether_transport::ConnectionId;

use crate::{lock, SessionError};

/// A request sent to the client that has not been answered yet.
struct Outstanding {
    /// Issue order; replay follows it.
    seq: u64,
    key: String,
    message: String,
    resolver: Resolver<String>,
    /// The raw request currently carrying it, if any.
    in_flight: Option<CancelHandle>,
}

struct State<S> {
    binding: S,
    listeners: Vec<RequestListener>,
    outstanding: HashMap<RequestToken, Outstanding>,
    next_seq: u64,
    /// Whether upstream has accepted the session yet.
    open: bool,
    /// Inbound events that arrived before upstream accepted.
    backlog: Vec<RequestEvent>,
}

struct Shared<S> {
    identity: Identity,
    socket_id: ConnectionId,
    codec: DelimitedCodec,
    max_outstanding: Option<usize>,
    state: Mutex<State<S>>,
}

/// One identity's session. Cheap to clone; clones share state.
///
/// `Session` is also the [`Socket`] the session manager hands upstream, so
/// the layers above address a client without knowing which connection it
/// currently uses.
pub struct Session<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Socket> Session<S> {
    pub(crate) fn new(
        identity: Identity,
        binding: S,
        codec: DelimitedCodec,
        max_outstanding: Option<usize>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity,
                socket_id: ConnectionId::next(),
                codec,
                max_outstanding,
                state: Mutex::new(State {
                    binding,
                    listeners: Vec::new(),
                    outstanding: HashMap::new(),
                    next_seq: 0,
                    open: false,
                    backlog: Vec::new(),
                }),
            }),
        }
    }

    fn from_weak(weak: &Weak<Shared<S>>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    /// The identity this session belongs to.
    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// The raw socket the session is currently bound to.
    pub fn binding(&self) -> S {
        lock(&self.shared.state).binding.clone()
    }

    /// Replaces the binding and returns the orphaned one.
    ///
    /// Outstanding requests are kept; call
    /// [`replay_outstanding`](Self::replay_outstanding) to re-send them.
    pub fn bind(&self, socket: S) -> S {
        std::mem::replace(&mut lock(&self.shared.state).binding, socket)
    }

    /// Number of requests waiting for the client to answer.
    pub fn outstanding_len(&self) -> usize {
        lock(&self.shared.state).outstanding.len()
    }

    /// Starts delivering inbound requests, including those that arrived
    /// before this call.
    pub(crate) fn open(&self) {
        let (listeners, backlog) = {
            let mut state = lock(&self.shared.state);
            if state.open {
                return;
            }
            state.open = true;
            (state.listeners.clone(), std::mem::take(&mut state.backlog))
        };
        for event in backlog {
            deliver(&listeners, &event);
        }
    }

    /// Decodes a raw application message and hands it to the listeners.
    ///
    /// Replies go back through `raw`, i.e. over whatever connection
    /// delivered it. Undecodable messages are dropped. Returns whether the
    /// message was accepted.
    pub fn dispatch_inbound(&self, raw: &RequestEvent) -> bool {
        let Some((key, message)) = self.shared.codec.deserialize(raw.message()) else {
            tracing::debug!(identity = %self.shared.identity, "dropping undecodable message");
            return false;
        };
        let event = raw.rekey(key, message);

        let listeners = {
            let mut state = lock(&self.shared.state);
            if !state.open {
                state.backlog.push(event);
                return true;
            }
            state.listeners.clone()
        };
        deliver(&listeners, &event);
        true
    }

    /// Settles the outstanding request `token` with `value`.
    ///
    /// Returns `false` (and drops the value) if no such request is
    /// outstanding, e.g. it was already answered over an older binding.
    pub fn resolve_outstanding(&self, token: &RequestToken, value: String) -> bool {
        let entry = lock(&self.shared.state).outstanding.remove(token);
        match entry {
            Some(entry) => {
                entry.resolver.resolve(value);
                true
            }
            None => {
                tracing::debug!(identity = %self.shared.identity, %token, "dropping stale response");
                false
            }
        }
    }

    /// Re-sends every outstanding request over the current binding, each
    /// under its original token and in the order they were first issued.
    /// Returns how many were re-sent.
    pub fn replay_outstanding(&self) -> usize {
        let tokens: Vec<RequestToken> = {
            let state = lock(&self.shared.state);
            let mut pending: Vec<(u64, &RequestToken)> = state
                .outstanding
                .iter()
                .map(|(token, entry)| (entry.seq, token))
                .collect();
            pending.sort_unstable_by_key(|(seq, _)| *seq);
            pending.into_iter().map(|(_, token)| token.clone()).collect()
        };

        let replayed = tokens.iter().filter(|token| self.transmit(token)).count();
        if replayed > 0 {
            tracing::info!(identity = %self.shared.identity, replayed, "replayed outstanding requests");
        }
        replayed
    }

    /// Sends the ledger entry `token` over the current binding, replacing
    /// any earlier raw request that carried it.
    fn transmit(&self, token: &RequestToken) -> bool {
        let (binding, wire) = {
            let state = lock(&self.shared.state);
            let Some(entry) = state.outstanding.get(token) else {
                return false;
            };
            (
                state.binding.clone(),
                self.shared.codec.serialize(&entry.key, &entry.message),
            )
        };

        let raw = binding.request(token.as_str(), &wire);
        let handle = raw.cancel_handle();

        let superseded = {
            let mut state = lock(&self.shared.state);
            match state.outstanding.get_mut(token) {
                Some(entry) => Ok(entry.in_flight.replace(handle)),
                None => Err(handle),
            }
        };
        match superseded {
            Ok(Some(previous)) => previous.cancel(),
            Ok(None) => {}
            Err(handle) => {
                // Answered or canceled while we were sending.
                handle.cancel();
                return false;
            }
        }

        let weak = Arc::downgrade(&self.shared);
        let token = token.clone();
        tokio::spawn(async move {
            match raw.await {
                Ok(reply) => {
                    if let Some(session) = Session::from_weak(&weak) {
                        session.resolve_outstanding(&token, reply);
                    }
                }
                Err(e) => {
                    tracing::debug!(%token, error = %e, "raw request ended without a reply");
                }
            }
        });
        true
    }
}

fn deliver(listeners: &[RequestListener], event: &RequestEvent) {
    for listener in listeners {
        listener(event.clone());
    }
}

impl<S: Socket> Socket for Session<S> {
    /// Sends a request to the client behind this session.
    ///
    /// The request is recorded in the ledger before it is sent, so it
    /// survives a reconnect. It leaves the ledger when answered or
    /// canceled.
    fn request(&self, key: &str, message: &str) -> Cancelable<String> {
        let token = RequestToken::generate();
        let (future, resolver) = Cancelable::pair();

        {
            let mut state = lock(&self.shared.state);
            if let Some(max) = self.shared.max_outstanding {
                if state.outstanding.len() >= max {
                    drop(state);
                    tracing::warn!(identity = %self.shared.identity, max, "outstanding-request ledger full");
                    return Cancelable::failed(FutureError::rejected(
                        SessionError::LedgerFull(max).to_string(),
                    ));
                }
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.outstanding.insert(
                token.clone(),
                Outstanding {
                    seq,
                    key: key.to_string(),
                    message: message.to_string(),
                    resolver: resolver.clone(),
                    in_flight: None,
                },
            );
        }

        let weak = Arc::downgrade(&self.shared);
        let canceled = token.clone();
        resolver.on_cancel(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let entry = lock(&shared.state).outstanding.remove(&canceled);
            if let Some(handle) = entry.and_then(|entry| entry.in_flight) {
                handle.cancel();
            }
        });

        tracing::debug!(identity = %self.shared.identity, %token, key, "sending request");
        self.transmit(&token);
        future
    }

    fn add_request_listener(&self, listener: RequestListener) {
        lock(&self.shared.state).listeners.push(listener);
    }

    fn id(&self) -> ConnectionId {
        self.shared.socket_id
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.shared.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    //! Unit tests for `Session`, driven through a recording socket so the
    //! raw traffic can be inspected and answered by hand.

    use super::*;

    /// One raw request captured by [`RecordingSocket`].
    pub(crate) struct Sent {
        pub key: String,
        pub message: String,
        pub resolver: Resolver<String>,
    }

    /// A [`Socket`] that records outgoing requests instead of sending them.
    #[derive(Clone)]
    pub(crate) struct RecordingSocket {
        id: ConnectionId,
        pub sent: Arc<Mutex<Vec<Sent>>>,
    }

    impl RecordingSocket {
        pub fn new() -> Self {
            Self {
                id: ConnectionId::next(),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn keys(&self) -> Vec<String> {
            lock(&self.sent).iter().map(|s| s.key.clone()).collect()
        }
    }

    impl Socket for RecordingSocket {
        fn request(&self, key: &str, message: &str) -> Cancelable<String> {
            let (future, resolver) = Cancelable::pair();
            lock(&self.sent).push(Sent {
                key: key.to_string(),
                message: message.to_string(),
                resolver,
            });
            future
        }

        fn add_request_listener(&self, _listener: RequestListener) {}

        fn id(&self) -> ConnectionId {
            self.id
        }
    }

    fn session(socket: &RecordingSocket) -> Session<RecordingSocket> {
        Session::new(
            Identity::from("abc123"),
            socket.clone(),
            DelimitedCodec::default(),
            Some(4),
        )
    }

    fn collecting(session: &Session<RecordingSocket>) -> Arc<Mutex<Vec<(String, String)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.add_request_listener(Arc::new(move |event: RequestEvent| {
            lock(&sink).push((event.key().to_string(), event.message().to_string()));
        }));
        seen
    }

    // =====================================================================
    // request() / resolve_outstanding()
    // =====================================================================

    #[tokio::test]
    async fn test_request_sends_packed_message_under_token() {
        let raw = RecordingSocket::new();
        let session = session(&raw);

        let _reply = session.request("move", "a|b");

        let sent = lock(&raw.sent);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key.len(), 32, "raw key is the request token");
        assert_eq!(sent[0].message, "move|a\\|b");
    }

    #[tokio::test]
    async fn test_request_resolves_when_raw_reply_arrives() {
        let raw = RecordingSocket::new();
        let session = session(&raw);

        let reply = session.request("move", "x");
        lock(&raw.sent)[0].resolver.resolve("ok".into());

        assert_eq!(reply.await, Ok("ok".to_string()));
        assert_eq!(session.outstanding_len(), 0);
    }

    #[tokio::test]
    async fn test_resolve_outstanding_unknown_token_returns_false() {
        let raw = RecordingSocket::new();
        let session = session(&raw);

        assert!(!session.resolve_outstanding(&RequestToken::from("nope"), "x".into()));
    }

    #[tokio::test]
    async fn test_cancel_removes_ledger_entry_and_raw_request() {
        let raw = RecordingSocket::new();
        let session = session(&raw);

        let reply = session.request("move", "x");
        reply.cancel();

        assert_eq!(session.outstanding_len(), 0);
        assert!(lock(&raw.sent)[0].resolver.is_settled(), "raw request canceled too");
        assert_eq!(reply.await, Err(FutureError::Canceled));
    }

    #[tokio::test]
    async fn test_request_beyond_ledger_cap_is_rejected() {
        let raw = RecordingSocket::new();
        let session = session(&raw);
        let _held: Vec<_> = (0..4).map(|i| session.request("k", &i.to_string())).collect();

        let refused = session.request("k", "5").await;

        assert!(matches!(refused, Err(FutureError::Rejected(_))));
        assert_eq!(session.outstanding_len(), 4);
        assert_eq!(lock(&raw.sent).len(), 4, "nothing sent for the refused request");
    }

    // =====================================================================
    // bind() / replay_outstanding()
    // =====================================================================

    #[tokio::test]
    async fn test_replay_resends_each_outstanding_with_original_token() {
        let first = RecordingSocket::new();
        let session = session(&first);
        let replies: Vec<_> = (0..3)
            .map(|i| session.request("move", &i.to_string()))
            .collect();

        let second = RecordingSocket::new();
        session.bind(second.clone());
        assert_eq!(session.replay_outstanding(), 3);

        let mut original = first.keys();
        let mut replayed = second.keys();
        original.sort();
        replayed.sort();
        assert_eq!(original, replayed, "tokens preserved across the rebind");

        // Answer over the new binding: each caller gets its own value.
        for sent in lock(&second.sent).iter() {
            let (_, n) = DelimitedCodec::default().deserialize(&sent.message).unwrap();
            sent.resolver.resolve(format!("reply-{n}"));
        }
        for (i, reply) in replies.into_iter().enumerate() {
            assert_eq!(reply.await, Ok(format!("reply-{i}")));
        }
    }

    #[tokio::test]
    async fn test_replay_resends_in_issue_order() {
        let first = RecordingSocket::new();
        let session = Session::new(
            Identity::from("abc123"),
            first.clone(),
            DelimitedCodec::default(),
            None,
        );
        let mut replies: Vec<_> = (0..16)
            .map(|i| session.request("move", &i.to_string()))
            .collect();
        // An answered request drops out without disturbing the rest.
        lock(&first.sent)[5].resolver.resolve("done".into());
        assert_eq!(replies.remove(5).await, Ok("done".to_string()));

        let second = RecordingSocket::new();
        session.bind(second.clone());
        assert_eq!(session.replay_outstanding(), 15);

        let mut expected = first.keys();
        expected.remove(5);
        assert_eq!(second.keys(), expected);
    }

    #[tokio::test]
    async fn test_replay_cancels_superseded_raw_request() {
        let first = RecordingSocket::new();
        let session = session(&first);
        let _reply = session.request("move", "x");

        session.bind(RecordingSocket::new());
        session.replay_outstanding();

        assert!(lock(&first.sent)[0].resolver.is_settled());
    }

    #[tokio::test]
    async fn test_bind_returns_orphaned_socket() {
        let first = RecordingSocket::new();
        let session = session(&first);

        let orphan = session.bind(RecordingSocket::new());

        assert_eq!(orphan.id(), first.id());
        assert_ne!(session.binding().id(), first.id());
    }

    // =====================================================================
    // dispatch_inbound()
    // =====================================================================

    #[tokio::test]
    async fn test_dispatch_inbound_decodes_and_delivers() {
        let session = session(&RecordingSocket::new());
        let seen = collecting(&session);
        session.open();

        let raw = RequestEvent::new("abc123", "move|{x:0,y:0}", |_| {});
        assert!(session.dispatch_inbound(&raw));

        assert_eq!(
            *lock(&seen),
            vec![("move".to_string(), "{x:0,y:0}".to_string())]
        );
    }

    #[tokio::test]
    async fn test_dispatch_inbound_drops_undecodable() {
        let session = session(&RecordingSocket::new());
        let seen = collecting(&session);
        session.open();

        let raw = RequestEvent::new("abc123", "no delimiter here", |_| {});

        assert!(!session.dispatch_inbound(&raw));
        assert!(lock(&seen).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_inbound_waits_for_open() {
        let session = session(&RecordingSocket::new());
        let seen = collecting(&session);

        session.dispatch_inbound(&RequestEvent::new("abc123", "early|1", |_| {}));
        assert!(lock(&seen).is_empty());

        session.open();
        assert_eq!(*lock(&seen), vec![("early".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn test_dispatch_inbound_reply_uses_raw_responder() {
        let session = session(&RecordingSocket::new());
        session.add_request_listener(Arc::new(|event: RequestEvent| {
            event.respond(format!("got {}", event.message()));
        }));
        session.open();

        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        let raw = RequestEvent::new("abc123", "move|x", move |reply| lock(&sink).push(reply));
        session.dispatch_inbound(&raw);

        assert_eq!(*lock(&replies), vec!["got x".to_string()]);
    }
}
