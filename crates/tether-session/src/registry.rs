//! The identity → session registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tether_network::Socket;
use tether_protocol::Identity;
use tether_transport::ConnectionId;

use crate::{lock, Session};

struct Entries<S> {
    /// Every session ever created, keyed by identity.
    sessions: HashMap<Identity, Session<S>>,

    /// Which identity each raw connection is currently bound to.
    ///
    /// Lets the manager find "the session of the connection that sent
    /// this" without scanning every session. Kept in sync with the
    /// sessions' bindings: a rebind removes the orphaned connection.
    by_connection: HashMap<ConnectionId, Identity>,
}

/// Shared handle to the sessions owned by one
/// [`SessionManager`](crate::SessionManager).
///
/// Clones refer to the same registry. Identity ↔ session is a bijection:
/// each identity maps to exactly one live session.
pub struct SessionRegistry<S> {
    entries: Arc<Mutex<Entries<S>>>,
}

impl<S> Clone for SessionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<S: Socket> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Socket> SessionRegistry<S> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                sessions: HashMap::new(),
                by_connection: HashMap::new(),
            })),
        }
    }

    /// Looks up the session for `identity`.
    pub fn get(&self, identity: &Identity) -> Option<Session<S>> {
        lock(&self.entries).sessions.get(identity).cloned()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        lock(&self.entries).sessions.len()
    }

    /// Returns `true` if no session exists yet.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).sessions.is_empty()
    }

    /// All known identities, in no particular order.
    pub fn identities(&self) -> Vec<Identity> {
        lock(&self.entries).sessions.keys().cloned().collect()
    }

    /// The session currently bound to the raw connection `conn_id`.
    pub fn bound_to(&self, conn_id: ConnectionId) -> Option<Session<S>> {
        let entries = lock(&self.entries);
        let identity = entries.by_connection.get(&conn_id)?;
        entries.sessions.get(identity).cloned()
    }

    /// Adds a freshly created session.
    pub(crate) fn insert(&self, session: Session<S>) {
        let conn_id = session.binding().id();
        let mut entries = lock(&self.entries);
        entries
            .by_connection
            .insert(conn_id, session.identity().clone());
        entries
            .sessions
            .insert(session.identity().clone(), session);
    }

    /// Moves `session` onto `socket` and updates the connection index.
    pub(crate) fn rebind(&self, session: &Session<S>, socket: S) {
        let new_conn = socket.id();
        let orphan = session.bind(socket);

        let mut entries = lock(&self.entries);
        if entries.by_connection.get(&orphan.id()) == Some(session.identity()) {
            entries.by_connection.remove(&orphan.id());
        }
        entries
            .by_connection
            .insert(new_conn, session.identity().clone());
    }

    #[cfg(test)]
    pub(crate) fn indexed_connections(&self) -> usize {
        lock(&self.entries).by_connection.len()
    }
}

#[cfg(test)]
mod tests {
    use tether_protocol::DelimitedCodec;

    use super::*;
    use crate::session::tests::RecordingSocket;

    fn session_on(socket: &RecordingSocket, id: &str) -> Session<RecordingSocket> {
        Session::new(Identity::from(id), socket.clone(), DelimitedCodec::default(), None)
    }

    #[test]
    fn test_insert_indexes_by_identity_and_connection() {
        let registry = SessionRegistry::new();
        let socket = RecordingSocket::new();
        registry.insert(session_on(&socket, "abc123"));

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&Identity::from("abc123")).is_some());
        let bound = registry.bound_to(socket.id()).unwrap();
        assert_eq!(bound.identity().as_str(), "abc123");
    }

    #[test]
    fn test_rebind_moves_connection_index() {
        let registry = SessionRegistry::new();
        let first = RecordingSocket::new();
        let session = session_on(&first, "abc123");
        registry.insert(session.clone());

        let second = RecordingSocket::new();
        registry.rebind(&session, second.clone());

        assert!(registry.bound_to(first.id()).is_none());
        assert!(registry.bound_to(second.id()).is_some());
        assert_eq!(registry.indexed_connections(), 1);
        assert_eq!(registry.len(), 1, "rebinding never creates a session");
    }

    #[test]
    fn test_identities_lists_every_session() {
        let registry = SessionRegistry::new();
        registry.insert(session_on(&RecordingSocket::new(), "a"));
        registry.insert(session_on(&RecordingSocket::new(), "b"));

        let mut ids: Vec<String> =
            registry.identities().iter().map(|i| i.to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
