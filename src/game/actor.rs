//! Single owner of a player's `GameState`
//!
//! Every consumption loop and the command REPL talk to the state through a
//! cloned [`GameHandle`]; the owning task applies requests strictly in the
//! order they arrive, so unit counts are never read-modify-written
//! concurrently.

use crate::error::{PerilError, Result};
use crate::game::state::{GameState, MoveOutcome, WarResolution};
use crate::game::units::{Location, Unit, UnitId, UnitRank};
use crate::types::{ArmyMove, PlayerSnapshot, PlayingState, RecognitionOfWar, Username};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const MAILBOX_CAPACITY: usize = 256;

/// Everything the REPL shows for `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub snapshot: PlayerSnapshot,
    pub paused: bool,
    pub sightings: BTreeMap<Location, BTreeMap<Username, usize>>,
}

enum Request {
    Spawn {
        location: Location,
        rank: UnitRank,
        reply: oneshot::Sender<Result<Unit>>,
    },
    Move {
        destination: Location,
        unit_ids: Vec<UnitId>,
        reply: oneshot::Sender<Result<ArmyMove>>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Pause {
        state: PlayingState,
        reply: oneshot::Sender<()>,
    },
    HandleMove {
        army_move: ArmyMove,
        reply: oneshot::Sender<MoveOutcome>,
    },
    ResolveWar {
        war: RecognitionOfWar,
        reply: oneshot::Sender<WarResolution>,
    },
    CommitWar {
        war: RecognitionOfWar,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable handle to the task that owns the game state
#[derive(Clone)]
pub struct GameHandle {
    username: Username,
    tx: mpsc::Sender<Request>,
}

impl GameHandle {
    /// Move `state` into a new owner task
    pub fn start(state: GameState) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let username = state.username().to_string();
        let task = tokio::spawn(run(state, rx));

        (Self { username, tx }, task)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn spawn_unit(&self, location: Location, rank: UnitRank) -> Result<Unit> {
        self.request(|reply| Request::Spawn {
            location,
            rank,
            reply,
        })
        .await?
    }

    pub async fn move_units(&self, destination: Location, unit_ids: Vec<UnitId>) -> Result<ArmyMove> {
        self.request(|reply| Request::Move {
            destination,
            unit_ids,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<StatusReport> {
        self.request(|reply| Request::Status { reply }).await
    }

    pub async fn handle_pause(&self, state: PlayingState) -> Result<()> {
        self.request(|reply| Request::Pause { state, reply }).await
    }

    pub async fn handle_move(&self, army_move: ArmyMove) -> Result<MoveOutcome> {
        self.request(|reply| Request::HandleMove { army_move, reply })
            .await
    }

    /// Decide `war` without touching units or sightings
    pub async fn resolve_war(&self, war: RecognitionOfWar) -> Result<WarResolution> {
        self.request(|reply| Request::ResolveWar { war, reply }).await
    }

    /// Apply the outcome decided by [`GameHandle::resolve_war`]
    pub async fn commit_war(&self, war: RecognitionOfWar) -> Result<bool> {
        self.request(|reply| Request::CommitWar { war, reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| PerilError::StateUnavailable {
                message: format!("state owner for {} has stopped", self.username),
            })?;
        response.await.map_err(|_| PerilError::StateUnavailable {
            message: format!("state owner for {} dropped the request", self.username),
        })
    }
}

async fn run(mut state: GameState, mut rx: mpsc::Receiver<Request>) {
    info!("Game state owner started for {}", state.username());

    while let Some(request) = rx.recv().await {
        // A dropped reply receiver only means the caller stopped waiting
        match request {
            Request::Spawn {
                location,
                rank,
                reply,
            } => {
                let _ = reply.send(state.spawn(location, rank));
            }
            Request::Move {
                destination,
                unit_ids,
                reply,
            } => {
                let _ = reply.send(state.move_units(destination, &unit_ids));
            }
            Request::Status { reply } => {
                let _ = reply.send(StatusReport {
                    snapshot: state.snapshot(),
                    paused: state.is_paused(),
                    sightings: state.sightings().clone(),
                });
            }
            Request::Pause {
                state: playing,
                reply,
            } => {
                state.handle_pause(playing);
                let _ = reply.send(());
            }
            Request::HandleMove { army_move, reply } => {
                let _ = reply.send(state.handle_move(&army_move));
            }
            Request::ResolveWar { war, reply } => {
                let _ = reply.send(state.resolve_war(&war));
            }
            Request::CommitWar { war, reply } => {
                let _ = reply.send(state.commit_war(&war));
            }
        }
    }

    debug!("Game state owner for {} stopped", state.username());
}
