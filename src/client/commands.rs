//! Player commands typed at the client REPL

use crate::client::spam::malicious_log;
use crate::error::{PerilError, Result};
use crate::game::{GameHandle, Location, StatusReport, UnitId, UnitRank};
use crate::pubsub::{BrokerChannel, Publisher};
use crate::routing::{MessageKind, RoutingTable};
use crate::types::GameLog;
use crate::utils::split_words;
use std::fmt::Write;
use tracing::{info, warn};

pub const CLIENT_HELP: &str = "\
Possible commands:
* spawn <unit> <location>
    units: infantry, cavalry, artillery
    locations: americas, europe, africa, asia, antarctica, australia
* move <location> <unitID> <unitID> ...
* status
* spam <n>
* quit
* help";

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Spawn { location: Location, rank: UnitRank },
    Move { destination: Location, unit_ids: Vec<UnitId> },
    Status,
    Spam(usize),
    Quit,
    Help,
}

impl ClientCommand {
    /// Parse a REPL line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let words = split_words(line);
        let Some((command, args)) = words.split_first() else {
            return Ok(None);
        };

        let parsed = match command.to_lowercase().as_str() {
            "spawn" => {
                let [first, second] = args else {
                    return Err(PerilError::validation("usage: spawn <unit> <location>"));
                };
                // The vocabularies are disjoint, so either order works
                match (first.parse::<UnitRank>(), second.parse::<Location>()) {
                    (Ok(rank), Ok(location)) => ClientCommand::Spawn { location, rank },
                    _ => ClientCommand::Spawn {
                        location: first.parse()?,
                        rank: second.parse()?,
                    },
                }
            }
            "move" => {
                let Some((destination, ids)) = args.split_first() else {
                    return Err(PerilError::validation(
                        "usage: move <location> <unitID> <unitID> ...",
                    ));
                };
                if ids.is_empty() {
                    return Err(PerilError::validation("move needs at least one unit id"));
                }
                let unit_ids = ids
                    .iter()
                    .map(|id| {
                        id.parse::<UnitId>()
                            .map_err(|_| PerilError::validation(format!("invalid unit id: {}", id)))
                    })
                    .collect::<Result<Vec<_>>>()?;

                ClientCommand::Move {
                    destination: destination.parse()?,
                    unit_ids,
                }
            }
            "status" => ClientCommand::Status,
            "spam" => {
                let [count] = args else {
                    return Err(PerilError::validation("usage: spam <n>"));
                };
                let count = count
                    .parse()
                    .map_err(|_| PerilError::validation(format!("invalid number: {}", count)))?;
                ClientCommand::Spam(count)
            }
            "quit" => ClientCommand::Quit,
            "help" => ClientCommand::Help,
            other => {
                return Err(PerilError::validation(format!(
                    "unknown command '{}', type 'help' for a list of commands",
                    other
                )))
            }
        };
        Ok(Some(parsed))
    }
}

/// Outcome of `spam`; every publish is attempted regardless of failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamReport {
    pub attempted: usize,
    pub failures: Vec<(usize, PerilError)>,
}

impl SpamReport {
    pub fn published(&self) -> usize {
        self.attempted - self.failures.len()
    }
}

/// Runs commands against the game state and the broker
pub struct GameClient<C: BrokerChannel> {
    game: GameHandle,
    publisher: Publisher<C>,
    routing: RoutingTable,
}

impl<C: BrokerChannel> GameClient<C> {
    pub fn new(game: GameHandle, publisher: Publisher<C>, routing: RoutingTable) -> Self {
        Self {
            game,
            publisher,
            routing,
        }
    }

    pub fn game(&self) -> &GameHandle {
        &self.game
    }

    /// Execute one command and return the text to show the player
    ///
    /// `Quit` is left to the caller.
    pub async fn execute(&self, command: ClientCommand) -> Result<String> {
        match command {
            ClientCommand::Spawn { location, rank } => {
                let unit = self.game.spawn_unit(location, rank).await?;
                Ok(format!("Spawned a(n) {} in {} with id {}", unit.rank, unit.location, unit.id))
            }
            ClientCommand::Move {
                destination,
                unit_ids,
            } => {
                let army_move = self.game.move_units(destination, unit_ids).await?;
                let kind = MessageKind::ArmyMove;
                self.publisher
                    .publish_json(
                        self.routing.exchange_for(kind),
                        &self.routing.publish_key(kind, self.game.username()),
                        &army_move,
                    )
                    .await?;
                info!(
                    "{} moved {} unit(s) to {}",
                    self.game.username(),
                    army_move.unit_count(),
                    destination
                );
                Ok(format!(
                    "Moved {} unit(s) to {}",
                    army_move.unit_count(),
                    destination
                ))
            }
            ClientCommand::Status => Ok(render_status(&self.game.status().await?)),
            ClientCommand::Spam(count) => Ok(render_spam(&self.spam(count).await)),
            ClientCommand::Help => Ok(CLIENT_HELP.to_string()),
            ClientCommand::Quit => Ok("Quitting client...".to_string()),
        }
    }

    /// Publish `count` junk game logs, reporting each failure separately
    pub async fn spam(&self, count: usize) -> SpamReport {
        let username = self.game.username();
        let kind = MessageKind::GameLog;
        let exchange = self.routing.exchange_for(kind);
        let key = self.routing.publish_key(kind, username);

        let mut failures = Vec::new();
        for index in 0..count {
            let log = GameLog::new(username, malicious_log(&mut rand::thread_rng()));
            if let Err(e) = self.publisher.publish_binary(exchange, &key, &log).await {
                warn!("Spam log {} of {} failed: {}", index + 1, count, e);
                failures.push((index, e));
            }
        }

        SpamReport {
            attempted: count,
            failures,
        }
    }
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Player {}{}",
        report.snapshot.username,
        if report.paused { " (game paused)" } else { "" }
    );

    if report.snapshot.units.is_empty() {
        let _ = writeln!(out, "  no units");
    }
    for unit in report.snapshot.units.values() {
        let _ = writeln!(out, "  * {}: {}, {}", unit.id, unit.location, unit.rank);
    }

    for (location, players) in &report.sightings {
        for (player, count) in players {
            let _ = writeln!(out, "  seen: {} with {} unit(s) in {}", player, count, location);
        }
    }
    out.trim_end().to_string()
}

fn render_spam(report: &SpamReport) -> String {
    let mut out = format!(
        "Published {} of {} spam logs",
        report.published(),
        report.attempted
    );
    for (index, error) in &report.failures {
        let _ = write!(out, "\n  log {} failed: {}", index + 1, error);
    }
    out
}
