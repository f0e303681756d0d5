//! State synchronization for Tether.
//!
//! The server pushes opaque state strings to its clients and asks them
//! questions about that state; clients answer through a
//! [`SyncResponder`]. Two request keys carry everything:
//!
//! | key           | message                         | reply              |
//! |---------------|---------------------------------|--------------------|
//! | `syncUpdate`  | the state                       | `""` once applied  |
//! | `syncRequest` | `{"state": …, <extra fields>}`  | the responder's    |
//!
//! A `syncRequest` first runs
//! [`on_update_state`](SyncResponder::on_update_state) and then
//! [`on_request`](SyncResponder::on_request), so an answer is always
//! computed against the state it was asked about. A request whose payload
//! is not JSON or has no string `state` is logged and never answered; the
//! asking side sees that as a timeout.
//!
//! [`RemoteTable`] layers named, typed methods over `syncRequest`, and
//! [`SyncServer::call`] invokes them.

mod client;
mod config;
mod error;
mod payload;
mod remote;
mod server;

pub use client::{SyncClient, SyncResponder};
pub use config::SyncConfig;
pub use error::SyncError;
pub use payload::SyncEvent;
pub use remote::{ARGS_FIELD, METHOD_FIELD, RemoteResponder, RemoteTable, call_fields};
pub use server::SyncServer;

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex guard, ignoring poisoning.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
