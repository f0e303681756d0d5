//! # Tether
//!
//! Reconnectable request/response sessions for turn-based web games.
//!
//! A client registers once and gets an [`Identity`](tether_protocol::Identity).
//! From then on every request either side makes is tied to that identity,
//! not to a connection: when a connection drops, the server keeps the
//! session and its unanswered requests, and replays them with their
//! original tokens once the client logs back in. On top of sessions, the
//! sync layer pushes game state to players and asks them for moves.
//!
//! ```text
//! tether-transport   bytes over WebSocket (or memory, in tests)
//! tether-network     request/response frames, correlated by id
//! tether-session     identities, rebinding, outstanding-request replay
//! tether-sync        syncUpdate / syncRequest, remote methods
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::ops::ControlFlow;
//!
//! use tether::prelude::*;
//!
//! # async fn demo() -> Result<(), TetherError> {
//! let server = TetherServer::builder().bind("0.0.0.0:8080").build().await?;
//! run_main_loop(server.sync(), 2, |sync| async move {
//!     sync.broadcast_update("board").await;
//!     Ok::<_, TetherError>(ControlFlow::<()>::Continue(()))
//! })
//! .await;
//! # Ok(())
//! # }
//! ```

mod error;
mod main_loop;
mod server;

pub use error::TetherError;
pub use main_loop::run_main_loop;
pub use server::{SessionSync, TetherServer, TetherServerBuilder};

pub use tether_future as future;
pub use tether_network as network;
pub use tether_protocol as protocol;
pub use tether_session as session;
pub use tether_sync as sync;
pub use tether_transport as transport;

/// Everything a game server or client usually needs.
pub mod prelude {
    pub use crate::{SessionSync, TetherError, TetherServer, TetherServerBuilder, run_main_loop};
    pub use tether_future::{Cancelable, FutureError};
    pub use tether_network::{
        ConnectionEvent, FramedLayer, FramedSocket, NetworkLayer, RequestEvent, Socket,
    };
    pub use tether_protocol::{Identity, RequestToken};
    pub use tether_session::{
        ClientConfig, Session, SessionClient, SessionConfig, SessionManager, UnknownLoginPolicy,
    };
    pub use tether_sync::{
        RemoteResponder, RemoteTable, SyncClient, SyncConfig, SyncError, SyncEvent, SyncResponder,
        SyncServer,
    };
    pub use tether_transport::{
        MemoryConnector, MemoryTransport, WebSocketConnection, WebSocketTransport,
    };
}
