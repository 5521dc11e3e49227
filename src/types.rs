//! Message payloads exchanged between game processes

use crate::game::units::{Location, Unit, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Player username, also used as the routing-key suffix
pub type Username = String;

/// A player's units at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub username: Username,
    pub units: BTreeMap<UnitId, Unit>,
}

impl PlayerSnapshot {
    pub fn new(username: impl Into<Username>) -> Self {
        Self {
            username: username.into(),
            units: BTreeMap::new(),
        }
    }

    /// Units currently stationed at `location`
    pub fn units_at(&self, location: Location) -> impl Iterator<Item = &Unit> + '_ {
        self.units
            .values()
            .filter(move |unit| unit.location == location)
    }

    pub fn count_at(&self, location: Location) -> usize {
        self.units_at(location).count()
    }

    /// Unit count per occupied location
    pub fn unit_counts(&self) -> BTreeMap<Location, usize> {
        let mut counts = BTreeMap::new();
        for unit in self.units.values() {
            *counts.entry(unit.location).or_insert(0) += 1;
        }
        counts
    }
}

/// A player moving some of their units to a new location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyMove {
    pub player: PlayerSnapshot,
    pub units: Vec<Unit>,
    pub to_location: Location,
}

impl ArmyMove {
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}

/// Declaration that two players' armies met at `location`; both snapshots
/// are frozen at the moment the conflict was detected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOfWar {
    pub attacker: PlayerSnapshot,
    pub defender: PlayerSnapshot,
    pub location: Location,
}

/// Free-text entry for the server's game log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub username: Username,
    pub message: String,
}

impl GameLog {
    pub fn new(username: impl Into<Username>, message: impl Into<String>) -> Self {
        Self {
            current_time: crate::utils::current_timestamp(),
            username: username.into(),
            message: message.into(),
        }
    }
}

/// Pause/resume broadcast from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}
