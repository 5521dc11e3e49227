//! Game server: pause/resume broadcasts and the game-log sink

pub mod game_log;

pub use game_log::{GameLogHandler, GameLogWriter};

use crate::error::{PerilError, Result};
use crate::pubsub::{Broker, BrokerChannel, MsgPackCodec, Publisher, Subscriber, Subscription};
use crate::routing::{MessageKind, RoutingTable};
use crate::types::PlayingState;
use crate::utils::split_words;
use tracing::info;

pub const SERVER_HELP: &str = "\
Possible commands:
* pause
* resume
* quit
* help";

/// A parsed server command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    Pause,
    Resume,
    Quit,
    Help,
}

impl ServerCommand {
    /// Parse a REPL line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let words = split_words(line);
        let Some(command) = words.first() else {
            return Ok(None);
        };

        let parsed = match command.to_lowercase().as_str() {
            "pause" => ServerCommand::Pause,
            "resume" => ServerCommand::Resume,
            "quit" => ServerCommand::Quit,
            "help" => ServerCommand::Help,
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

/// Broadcasts playing state to every client
pub struct GameServer<C: BrokerChannel> {
    publisher: Publisher<C>,
    routing: RoutingTable,
}

impl<C: BrokerChannel> GameServer<C> {
    pub fn new(publisher: Publisher<C>, routing: RoutingTable) -> Self {
        Self { publisher, routing }
    }

    pub async fn set_paused(&self, is_paused: bool) -> Result<()> {
        let kind = MessageKind::PlayingState;
        self.publisher
            .publish_json(
                self.routing.exchange_for(kind),
                &self.routing.publish_key(kind, "server"),
                &PlayingState { is_paused },
            )
            .await?;
        info!("Broadcast {}", if is_paused { "pause" } else { "resume" });
        Ok(())
    }

    /// Execute one command and return the text to show the operator
    pub async fn execute(&self, command: ServerCommand) -> Result<String> {
        match command {
            ServerCommand::Pause => {
                self.set_paused(true).await?;
                Ok("Pause message published".to_string())
            }
            ServerCommand::Resume => {
                self.set_paused(false).await?;
                Ok("Resume message published".to_string())
            }
            ServerCommand::Help => Ok(SERVER_HELP.to_string()),
            ServerCommand::Quit => Ok("Quitting server...".to_string()),
        }
    }
}

/// Consume every player's game logs from the shared durable queue
pub async fn subscribe_game_logs<B: Broker>(
    subscriber: &Subscriber<B>,
    routing: &RoutingTable,
    writer: GameLogWriter,
) -> Result<Subscription> {
    let kind = MessageKind::GameLog;
    subscriber
        .subscribe(
            MsgPackCodec,
            routing.exchange_for(kind),
            &routing.queue_name(kind, "server"),
            &routing.binding_key(kind),
            kind.durability(),
            GameLogHandler::new(writer),
        )
        .await
}
