//! Error types for the session layer.

use tether_future::FutureError;
use tether_protocol::{Identity, ProtocolError};

/// Errors that can occur while setting up or resuming a session.
///
/// Inbound traffic problems (undecodable messages, stale tokens, messages
/// for the wrong identity) are not errors: the session layer drops and
/// logs them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The configuration is unusable, e.g. the delimiter is the escape
    /// character.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A `register` or `login` request did not get an answer.
    #[error("handshake failed: {0}")]
    Handshake(#[from] FutureError),

    /// The server answered `register` with an empty identity.
    #[error("registration refused")]
    RegistrationRefused,

    /// The server refused to resume this identity.
    #[error("login for {0} was rejected")]
    LoginRejected(Identity),

    /// The server did not answer a `login` in time.
    #[error("login for {0} timed out")]
    LoginTimedOut(Identity),

    /// The session already has as many outstanding requests as allowed.
    #[error("too many outstanding requests (limit {0})")]
    LedgerFull(usize),

    /// Application traffic tried to use a key the session or sync layers
    /// own.
    #[error("key {0:?} is reserved")]
    ReservedKey(String),
}
