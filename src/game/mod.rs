//! Game state machine
//!
//! Units, the per-player state transitions, war resolution and the task that
//! serializes access to a player's state.

pub mod actor;
pub mod state;
pub mod units;
pub mod war;

pub use actor::{GameHandle, StatusReport};
pub use state::{GameState, MoveOutcome, WarOutcome, WarResolution};
pub use units::{Location, Unit, UnitId, UnitRank};
pub use war::{FixedTieBreaker, RandomTieBreaker, TieBreak, TieBreaker};
