//! Session-layer configuration.

use tether_protocol::DelimitedCodec;

/// What the server does with a `login` for an identity it has never
/// issued (or has forgotten, e.g. after a restart).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownLoginPolicy {
    /// Drop the login without replying. The client's own timeout decides
    /// what happens next.
    #[default]
    Ignore,

    /// Reply with an empty string, which clients read as "refused".
    Reject,

    /// Treat the login as a registration: mint a fresh identity for the
    /// connection and reply with it.
    Register,
}

/// Configuration for the server-side session layer.
///
/// ```rust
/// use tether_session::{SessionConfig, UnknownLoginPolicy};
///
/// let config = SessionConfig {
///     unknown_login: UnknownLoginPolicy::Register,
///     ..SessionConfig::default()
/// };
/// assert_eq!(config.max_outstanding, Some(1024));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handling of `login` for unknown identities.
    ///
    /// Default: [`UnknownLoginPolicy::Ignore`].
    pub unknown_login: UnknownLoginPolicy,

    /// Upper bound on a session's outstanding-request ledger. A request
    /// beyond it is rejected immediately. `None` means unbounded.
    ///
    /// Default: `Some(1024)`.
    pub max_outstanding: Option<usize>,

    /// Delimiter used to nest `(key, message)` pairs in one frame message.
    /// Must match the clients'.
    ///
    /// Default: `'|'`.
    pub delimiter: char,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            unknown_login: UnknownLoginPolicy::Ignore,
            max_outstanding: Some(1024),
            delimiter: DelimitedCodec::DEFAULT_DELIMITER,
        }
    }
}

/// Configuration for [`SessionClient`](crate::SessionClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for a `login` reply before falling back (on first
    /// connect) or failing (on reconnect). Negative waits forever.
    ///
    /// Default: 5000 ms.
    pub login_timeout_ms: i64,

    /// Must match the server's [`SessionConfig::delimiter`].
    ///
    /// Default: `'|'`.
    pub delimiter: char,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            login_timeout_ms: 5_000,
            delimiter: DelimitedCodec::DEFAULT_DELIMITER,
        }
    }
}
