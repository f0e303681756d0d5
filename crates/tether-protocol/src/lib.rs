//! Wire protocol for Tether.
//!
//! This crate defines the vocabulary every other layer shares:
//!
//! - **Identifiers** ([`Identity`], [`RequestToken`], [`generate_uid`]):
//!   unguessable tokens for reconnectable clients and in-flight requests.
//! - **Reserved keys** ([`REGISTER_KEY`], [`LOGIN_KEY`], [`SYNC_UPDATE_KEY`],
//!   [`SYNC_REQUEST_KEY`]): control keys that never collide with
//!   application traffic.
//! - **Frames** ([`Frame`]): the request/response unit carried over a raw
//!   byte connection.
//! - **Codecs** ([`Codec`] + [`JsonCodec`] for serde types, [`KeyedCodec`] +
//!   [`DelimitedCodec`] for `(key, message)` pairs nested inside a frame).
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Network (Frame) → Session (Identity) → Sync
//! ```

mod codec;
mod error;
mod ident;
mod keyed;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use ident::{generate_uid, Identity, RequestToken};
pub use keyed::{DelimitedCodec, KeyedCodec};
pub use types::{
    is_reserved, Frame, LOGIN_KEY, REGISTER_KEY, SYNC_REQUEST_KEY,
    SYNC_UPDATE_KEY,
};
