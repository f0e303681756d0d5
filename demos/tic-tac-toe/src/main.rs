//! Two bots play tic-tac-toe against a Tether server, all in one process.
//!
//! The server owns the board and asks whoever's turn it is for a move
//! through a remote call; after every move it pushes the new board to both
//! players. Run with `RUST_LOG=debug` to watch the session traffic.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tether::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Game types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Mark {
    X,
    O,
}

impl Mark {
    fn other(self) -> Self {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    /// Index into the join order: X joins first.
    fn seat(self) -> usize {
        match self {
            Mark::X => 0,
            Mark::O => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Won(Mark),
    Draw,
}

#[derive(Debug, Serialize, Deserialize)]
struct Move {
    cell: usize,
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Center first, then corners, then edges.
const PREFERENCE: [usize; 9] = [4, 0, 2, 6, 8, 1, 3, 5, 7];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Board {
    cells: [Option<Mark>; 9],
    next: Mark,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            cells: [None; 9],
            next: Mark::X,
        }
    }
}

impl Board {
    fn place(&mut self, mark: Mark, cell: usize) -> Result<(), GameError> {
        if mark != self.next {
            return Err(GameError::IllegalMove {
                cell,
                reason: "not your turn",
            });
        }
        match self.cells.get(cell) {
            None => Err(GameError::IllegalMove {
                cell,
                reason: "no such cell",
            }),
            Some(Some(_)) => Err(GameError::IllegalMove {
                cell,
                reason: "cell is occupied",
            }),
            Some(None) => {
                self.cells[cell] = Some(mark);
                self.next = mark.other();
                Ok(())
            }
        }
    }

    fn winner(&self) -> Option<Mark> {
        LINES.iter().find_map(|line| {
            let first = self.cells[line[0]]?;
            line.iter()
                .all(|&cell| self.cells[cell] == Some(first))
                .then_some(first)
        })
    }

    fn outcome(&self) -> Option<Outcome> {
        match self.winner() {
            Some(mark) => Some(Outcome::Won(mark)),
            None if self.cells.iter().all(Option::is_some) => Some(Outcome::Draw),
            None => None,
        }
    }

    fn empty_cells(&self) -> impl Iterator<Item = usize> + '_ {
        (0..9).filter(|&cell| self.cells[cell].is_none())
    }

    /// Whether `mark` would win by taking `cell`.
    fn wins_with(&self, mark: Mark, cell: usize) -> bool {
        let mut trial = self.clone();
        trial.cells[cell] = Some(mark);
        trial.winner() == Some(mark)
    }
}

#[derive(Debug, thiserror::Error)]
enum GameError {
    #[error("illegal move at cell {cell}: {reason}")]
    IllegalMove { cell: usize, reason: &'static str },

    #[error("no player for {0:?}")]
    MissingPlayer(Mark),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Bot player
// ---------------------------------------------------------------------------

/// Wins if it can, blocks if it must, otherwise follows [`PREFERENCE`].
fn choose(board: &Board, mark: Mark) -> Option<usize> {
    let empty: Vec<usize> = board.empty_cells().collect();
    empty
        .iter()
        .copied()
        .find(|&cell| board.wins_with(mark, cell))
        .or_else(|| {
            empty
                .iter()
                .copied()
                .find(|&cell| board.wins_with(mark.other(), cell))
        })
        .or_else(|| PREFERENCE.into_iter().find(|cell| empty.contains(cell)))
}

fn bot() -> RemoteResponder {
    let board = Arc::new(Mutex::new(Board::default()));

    let seen = Arc::clone(&board);
    let table = RemoteTable::new().register("get_move", move |mark: Mark| {
        let board = Arc::clone(&seen);
        async move {
            let board = board.lock().unwrap_or_else(PoisonError::into_inner).clone();
            let cell = choose(&board, mark).ok_or_else(|| SyncError::responder("board is full"))?;
            Ok(Move { cell })
        }
    });

    RemoteResponder::new(table).on_state(move |state: &str| {
        match serde_json::from_str::<Board>(state) {
            Ok(next) => *board.lock().unwrap_or_else(PoisonError::into_inner) = next,
            Err(e) => tracing::warn!(error = %e, "unreadable board"),
        }
    })
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

type GameSync = SessionSync<MemoryTransport>;

async fn turn(sync: &GameSync, board: &Mutex<Board>) -> Result<ControlFlow<Outcome>, GameError> {
    let current = board.lock().unwrap_or_else(PoisonError::into_inner).clone();
    let mark = current.next;
    let players = sync.clients();
    let player = players
        .get(mark.seat())
        .ok_or(GameError::MissingPlayer(mark))?;

    let state = serde_json::to_string(&current)?;
    let chosen: Move = sync.call(player, &state, "get_move", mark).await?;

    let next = {
        let mut board = board.lock().unwrap_or_else(PoisonError::into_inner);
        board.place(mark, chosen.cell)?;
        board.clone()
    };
    tracing::info!(?mark, cell = chosen.cell, "move");

    sync.broadcast_update(&serde_json::to_string(&next)?).await;
    Ok(match next.outcome() {
        Some(outcome) => ControlFlow::Break(outcome),
        None => ControlFlow::Continue(()),
    })
}

async fn play() -> Result<(Outcome, Board), TetherError> {
    let (transport, connector) = MemoryTransport::new();
    let server = TetherServer::builder().build_with(transport)?;
    server.listen();

    // Keep the clients alive for the whole game.
    let mut clients = Vec::new();
    for mark in [Mark::X, Mark::O] {
        let socket = FramedSocket::connect(connector.connect()?);
        let client = SessionClient::connect(socket, None, ClientConfig::default()).await?;
        tracing::info!(identity = %client.identity(), ?mark, "player joined");
        SyncClient::new(bot()).attach(&client);
        clients.push(client);
    }

    let board = Arc::new(Mutex::new(Board::default()));
    let shared = Arc::clone(&board);
    let outcome = run_main_loop(server.sync(), 2, move |sync: GameSync| {
        let board = Arc::clone(&shared);
        async move { turn(&sync, &board).await }
    })
    .await;

    let board = board.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Ok((outcome, board))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (outcome, board) = play().await?;
    for row in board.cells.chunks(3) {
        let row: String = row
            .iter()
            .map(|cell| match cell {
                Some(Mark::X) => 'X',
                Some(Mark::O) => 'O',
                None => '.',
            })
            .collect();
        tracing::info!("{row}");
    }
    match outcome {
        Outcome::Won(mark) => tracing::info!(?mark, "game over: winner"),
        Outcome::Draw => tracing::info!("game over: draw"),
    }
    Ok(())
}
