//! Per-player game state and the transitions driven by commands and messages
//!
//! `GameState` is plain synchronous data. It is never shared directly between
//! consumption loops; [`crate::game::actor::GameHandle`] owns it and feeds it
//! one request at a time.

use crate::error::{PerilError, Result};
use crate::game::units::{Location, Unit, UnitId, UnitRank};
use crate::game::war::{RandomTieBreaker, TieBreak, TieBreaker};
use crate::types::{ArmyMove, PlayerSnapshot, PlayingState, RecognitionOfWar, Username};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

/// How many committed wars are remembered for redelivery
const REMEMBERED_WARS: usize = 64;

/// Result of receiving another player's army move
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The move landed somewhere we have no units
    Safe,
    /// The move landed on our units; the recognition must be published
    MakeWar(RecognitionOfWar),
    /// We received our own move
    SamePlayer,
}

/// Result of receiving a war recognition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarOutcome {
    /// We are neither the attacker nor the defender
    NotInvolved,
    /// One side has no units at the contested location
    NoUnits,
    YouWon {
        winner: Username,
        loser: Username,
        location: Location,
    },
    OpponentWon {
        winner: Username,
        loser: Username,
        location: Location,
    },
    Draw {
        attacker: Username,
        defender: Username,
        location: Location,
    },
}

impl WarOutcome {
    /// Game log line for resolved wars
    pub fn log_message(&self) -> Option<String> {
        match self {
            WarOutcome::YouWon { winner, loser, .. }
            | WarOutcome::OpponentWon { winner, loser, .. } => {
                Some(format!("{} won a war against {}", winner, loser))
            }
            WarOutcome::Draw {
                attacker, defender, ..
            } => Some(format!(
                "A war between {} and {} resulted in a draw",
                attacker, defender
            )),
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
        }
    }

    fn is_resolved(&self) -> bool {
        !matches!(self, WarOutcome::NotInvolved | WarOutcome::NoUnits)
    }
}

/// A war outcome and whether it is already reflected in the local units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarResolution {
    pub outcome: WarOutcome,
    /// True when this recognition was committed before, so its game log
    /// has already been published
    pub committed: bool,
}

/// A local player's view of the world
pub struct GameState {
    player: PlayerSnapshot,
    next_unit_id: UnitId,
    paused: bool,
    /// Other players' unit counts as last reported by their moves
    sightings: BTreeMap<Location, BTreeMap<Username, usize>>,
    tie_breaker: Box<dyn TieBreaker>,
    /// Resolved wars whose effects wait for `commit_war`
    pending_wars: Vec<(RecognitionOfWar, WarOutcome)>,
    committed_wars: VecDeque<(RecognitionOfWar, WarOutcome)>,
}

impl GameState {
    pub fn new(username: impl Into<Username>) -> Self {
        Self::with_tie_breaker(username, Box::new(RandomTieBreaker::from_entropy()))
    }

    pub fn with_tie_breaker(username: impl Into<Username>, tie_breaker: Box<dyn TieBreaker>) -> Self {
        Self {
            player: PlayerSnapshot::new(username),
            next_unit_id: 1,
            paused: false,
            sightings: BTreeMap::new(),
            tie_breaker,
            pending_wars: Vec::new(),
            committed_wars: VecDeque::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.player.username
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.player.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Other players seen at `location`, with their unit counts
    pub fn sightings_at(&self, location: Location) -> BTreeMap<Username, usize> {
        self.sightings.get(&location).cloned().unwrap_or_default()
    }

    pub fn sightings(&self) -> &BTreeMap<Location, BTreeMap<Username, usize>> {
        &self.sightings
    }

    fn ensure_running(&self) -> Result<()> {
        if self.paused {
            return Err(PerilError::validation("the game is paused"));
        }
        Ok(())
    }

    /// Add one unit of `rank` at `location`
    pub fn spawn(&mut self, location: Location, rank: UnitRank) -> Result<Unit> {
        self.ensure_running()?;

        let unit = Unit {
            id: self.next_unit_id,
            rank,
            location,
        };
        self.next_unit_id += 1;
        self.player.units.insert(unit.id, unit.clone());

        info!(
            "Spawned {} #{} in {} for {}",
            unit.rank, unit.id, unit.location, self.player.username
        );
        Ok(unit)
    }

    /// Relocate owned units and build the move announcement
    pub fn move_units(&mut self, destination: Location, unit_ids: &[UnitId]) -> Result<ArmyMove> {
        self.ensure_running()?;

        if unit_ids.is_empty() {
            return Err(PerilError::validation("at least one unit id is required"));
        }
        if let Some(missing) = unit_ids
            .iter()
            .find(|id| !self.player.units.contains_key(id))
        {
            return Err(PerilError::validation(format!(
                "unit {} does not belong to {}",
                missing, self.player.username
            )));
        }

        let mut moved = Vec::with_capacity(unit_ids.len());
        for id in unit_ids {
            if let Some(unit) = self.player.units.get_mut(id) {
                unit.location = destination;
                if !moved.iter().any(|m: &Unit| m.id == *id) {
                    moved.push(unit.clone());
                }
            }
        }

        info!(
            "{} moved {} unit(s) to {}",
            self.player.username,
            moved.len(),
            destination
        );

        Ok(ArmyMove {
            player: self.player.clone(),
            units: moved,
            to_location: destination,
        })
    }

    pub fn handle_pause(&mut self, state: PlayingState) {
        self.paused = state.is_paused;
        if state.is_paused {
            info!("Game paused");
        } else {
            info!("Game resumed");
        }
    }

    pub fn handle_move(&mut self, army_move: &ArmyMove) -> MoveOutcome {
        let mover = &army_move.player.username;

        if *mover == self.player.username {
            debug!("Ignoring our own move to {}", army_move.to_location);
            return MoveOutcome::SamePlayer;
        }

        if self.player.count_at(army_move.to_location) > 0 {
            info!(
                "{} moved into {} where {} has units: war!",
                mover, army_move.to_location, self.player.username
            );
            return MoveOutcome::MakeWar(RecognitionOfWar {
                attacker: army_move.player.clone(),
                defender: self.player.clone(),
                location: army_move.to_location,
            });
        }

        // The mover's snapshot is authoritative for all of its locations
        self.forget_everywhere(mover);
        for (location, count) in army_move.player.unit_counts() {
            self.sightings
                .entry(location)
                .or_default()
                .insert(mover.clone(), count);
        }

        info!(
            "{} moved {} unit(s) to {}",
            mover,
            army_move.unit_count(),
            army_move.to_location
        );
        MoveOutcome::Safe
    }

    /// Decide the outcome of `war` without touching our units
    ///
    /// A recognition seen before yields the outcome decided the first time,
    /// so a redelivery never consults the tie breaker again.
    pub fn resolve_war(&mut self, war: &RecognitionOfWar) -> WarResolution {
        if let Some((_, outcome)) = self.committed_wars.iter().find(|(seen, _)| seen == war) {
            debug!(
                "War between {} and {} was already committed",
                war.attacker.username, war.defender.username
            );
            return WarResolution {
                outcome: outcome.clone(),
                committed: true,
            };
        }
        if let Some((_, outcome)) = self.pending_wars.iter().find(|(seen, _)| seen == war) {
            return WarResolution {
                outcome: outcome.clone(),
                committed: false,
            };
        }

        let outcome = self.decide_war(war);
        if outcome.is_resolved() {
            self.pending_wars.push((war.clone(), outcome.clone()));
        }
        WarResolution {
            outcome,
            committed: false,
        }
    }

    /// Apply the pending outcome of `war` to our units
    ///
    /// Returns false when `war` has no pending outcome.
    pub fn commit_war(&mut self, war: &RecognitionOfWar) -> bool {
        let Some(index) = self.pending_wars.iter().position(|(seen, _)| seen == war) else {
            return false;
        };
        let (war, outcome) = self.pending_wars.swap_remove(index);

        let opponent = if war.attacker.username == self.player.username {
            war.defender.username.clone()
        } else {
            war.attacker.username.clone()
        };
        match &outcome {
            WarOutcome::Draw { location, .. } => {
                self.remove_units_at(*location);
                self.forget(*location, &opponent);
            }
            WarOutcome::YouWon { location, .. } => self.forget(*location, &opponent),
            WarOutcome::OpponentWon { location, .. } => self.remove_units_at(*location),
            WarOutcome::NotInvolved | WarOutcome::NoUnits => {}
        }

        if self.committed_wars.len() == REMEMBERED_WARS {
            self.committed_wars.pop_front();
        }
        self.committed_wars.push_back((war, outcome));
        true
    }

    /// Resolve and commit in one step
    pub fn handle_war(&mut self, war: &RecognitionOfWar) -> WarOutcome {
        let resolution = self.resolve_war(war);
        if !resolution.committed {
            self.commit_war(war);
        }
        resolution.outcome
    }

    fn decide_war(&mut self, war: &RecognitionOfWar) -> WarOutcome {
        let me = &self.player.username;
        let we_attacked = war.attacker.username == *me;
        if !we_attacked && war.defender.username != *me {
            debug!(
                "War between {} and {} does not involve {}",
                war.attacker.username, war.defender.username, me
            );
            return WarOutcome::NotInvolved;
        }

        let location = war.location;
        let attacking = war.attacker.count_at(location);
        let defending = war.defender.count_at(location);
        if attacking == 0 || defending == 0 {
            return WarOutcome::NoUnits;
        }

        let attacker_won = match attacking.cmp(&defending) {
            Ordering::Greater => Some(true),
            Ordering::Less => Some(false),
            Ordering::Equal => match self.tie_breaker.break_tie() {
                TieBreak::Draw => None,
                TieBreak::AttackerWins => Some(true),
                TieBreak::DefenderWins => Some(false),
            },
        };

        let Some(attacker_won) = attacker_won else {
            info!(
                "War in {} ({} vs {} units) ended in a draw",
                location, attacking, defending
            );
            return WarOutcome::Draw {
                attacker: war.attacker.username.clone(),
                defender: war.defender.username.clone(),
                location,
            };
        };

        let (winner, loser) = if attacker_won {
            (war.attacker.username.clone(), war.defender.username.clone())
        } else {
            (war.defender.username.clone(), war.attacker.username.clone())
        };

        info!(
            "War in {} ({} vs {} units) won by {}",
            location, attacking, defending, winner
        );

        if attacker_won == we_attacked {
            WarOutcome::YouWon {
                winner,
                loser,
                location,
            }
        } else {
            WarOutcome::OpponentWon {
                winner,
                loser,
                location,
            }
        }
    }

    fn remove_units_at(&mut self, location: Location) {
        self.player.units.retain(|_, unit| unit.location != location);
    }

    fn forget(&mut self, location: Location, username: &str) {
        if let Some(players) = self.sightings.get_mut(&location) {
            players.remove(username);
            if players.is_empty() {
                self.sightings.remove(&location);
            }
        }
    }

    fn forget_everywhere(&mut self, username: &str) {
        self.sightings.retain(|_, players| {
            players.remove(username);
            !players.is_empty()
        });
    }
}
