//! Sync over the full stack: `SyncServer` on a `SessionManager`, clients
//! on `SessionClient`s, all over the in-memory transport.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Map;

use tether_network::{FramedLayer, FramedSocket, Socket};
use tether_protocol::SYNC_REQUEST_KEY;
use tether_session::{ClientConfig, SessionClient, SessionConfig, SessionManager};
use tether_sync::{
    RemoteResponder, RemoteTable, SyncClient, SyncConfig, SyncError, SyncEvent, SyncResponder,
    SyncServer,
};
use tether_transport::{MemoryConnector, MemoryTransport};

type Server = SyncServer<SessionManager<FramedLayer<MemoryTransport>>>;

fn server(config: SyncConfig) -> (Server, MemoryConnector) {
    let (transport, connector) = MemoryTransport::new();
    let manager = SessionManager::new(FramedLayer::new(transport), SessionConfig::default()).unwrap();
    let server = SyncServer::new(manager, config);
    server.listen();
    (server, connector)
}

async fn session(connector: &MemoryConnector) -> SessionClient<FramedSocket> {
    let socket = FramedSocket::connect(connector.connect().unwrap());
    SessionClient::connect(socket, None, ClientConfig::default())
        .await
        .unwrap()
}

/// Answers every request with the latest state it has seen.
#[derive(Default)]
struct LastState {
    state: Mutex<String>,
}

impl SyncResponder for LastState {
    async fn on_update_state(&self, event: &SyncEvent) -> Result<(), SyncError> {
        *self.state.lock().unwrap() = event.state.clone();
        Ok(())
    }

    async fn on_request(&self, _event: &SyncEvent) -> Result<String, SyncError> {
        Ok(self.state.lock().unwrap().clone())
    }
}

#[tokio::test]
async fn test_request_observes_state_sent_with_it() {
    let (server, connector) = server(SyncConfig::default());
    let client = session(&connector).await;
    SyncClient::new(LastState::default()).attach(&client);
    let players = server.wait_for_clients(1).await;

    server.update(&players[0], "S1").await.unwrap();
    let reply = server.request(&players[0], "S2", Map::new()).await;

    assert_eq!(reply, Ok("S2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_payload_times_out_on_sender() {
    let (server, connector) = server(SyncConfig::default());
    let client = session(&connector).await;
    SyncClient::new(LastState::default()).attach(&client);
    let players = server.wait_for_clients(1).await;

    let reply = players[0]
        .request(SYNC_REQUEST_KEY, r#"{"board":"S"}"#)
        .with_timeout(1_000)
        .await;

    assert_eq!(reply, Ok(None));
}

#[tokio::test]
async fn test_collect_gathers_every_client_in_join_order() {
    let (server, connector) = server(SyncConfig::default());
    let mut clients = Vec::new();
    for _ in 0..3 {
        let client = session(&connector).await;
        SyncClient::new(LastState::default()).attach(&client);
        clients.push(client);
    }
    server.wait_for_clients(3).await;

    let replies = server.collect("round-1", Map::new()).await;

    assert_eq!(replies, vec![Some("round-1".to_string()); 3]);
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Move {
    x: u8,
    y: u8,
}

#[tokio::test]
async fn test_remote_call_round_trips_typed_values() {
    let (server, connector) = server(SyncConfig::default());
    let seen = Arc::new(Mutex::new(String::new()));
    let client = session(&connector).await;

    let last = Arc::clone(&seen);
    let table = RemoteTable::new().register("get_move", |turn: u32| async move {
        Ok(Move {
            x: (turn % 3) as u8,
            y: 1,
        })
    });
    let responder = RemoteResponder::new(table)
        .on_state(move |state: &str| *last.lock().unwrap() = state.to_string());
    SyncClient::new(responder).attach(&client);
    let players = server.wait_for_clients(1).await;

    let chosen: Move = server
        .call(&players[0], "board-7", "get_move", 4u32)
        .await
        .unwrap();

    assert_eq!(chosen, Move { x: 1, y: 1 });
    assert_eq!(*seen.lock().unwrap(), "board-7");
}

#[tokio::test(start_paused = true)]
async fn test_call_to_silent_client_times_out() {
    let (server, connector) = server(SyncConfig {
        reply_timeout_ms: 500,
    });
    let _client = session(&connector).await;
    let players = server.wait_for_clients(1).await;

    let result: Result<u32, _> = server.call(&players[0], "S", "get_move", ()).await;

    assert!(matches!(result, Err(SyncError::TimedOut(500))));
}
