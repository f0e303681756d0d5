//! Reconnectable sessions for Tether.
//!
//! A raw connection is fragile: Wi-Fi drops, the phone sleeps, the tab
//! reloads. This crate gives each client an [`Identity`](tether_protocol::Identity)
//! that outlives its connections:
//!
//! 1. **Registration**: a new client sends `register` and receives an
//!    identity. The server creates a [`Session`] bound to that connection.
//! 2. **Resumption**: after a drop, the client sends `login` with its
//!    identity over a fresh connection. The session is rebound and every
//!    request the server was still waiting on is replayed.
//! 3. **Routing**: application traffic is delivered to the session bound
//!    to the connection it arrived on.
//!
//! # How it fits in the stack
//!
//! ```text
//! Sync layer (above)      ← sees one Socket per identity
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Network layer (below)   ← one Socket per raw connection
//! ```
//!
//! [`SessionManager`] is the server side and is itself a
//! [`NetworkLayer`](tether_network::NetworkLayer); [`SessionClient`] is the
//! client side and is itself a [`Socket`](tether_network::Socket).

mod client;
mod config;
mod error;
mod manager;
mod registry;
mod session;

pub use client::SessionClient;
pub use config::{ClientConfig, SessionConfig, UnknownLoginPolicy};
pub use error::SessionError;
pub use manager::{IdentityGenerator, SessionManager, SessionManagerBuilder};
pub use registry::SessionRegistry;
pub use session::Session;

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex guard, ignoring poisoning.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
