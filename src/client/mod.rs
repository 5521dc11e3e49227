//! Player client: subscriptions, message handlers and REPL commands

pub mod commands;
pub mod handlers;
pub mod spam;

pub use commands::{ClientCommand, GameClient, SpamReport, CLIENT_HELP};
pub use handlers::{MoveHandler, PauseHandler, WarHandler};

use crate::error::{PerilError, Result};
use crate::game::GameHandle;
use crate::pubsub::{Broker, JsonCodec, Publisher, Subscriber, Subscription};
use crate::routing::{MessageKind, RoutingTable};
use tracing::info;

/// Usernames end up in routing keys, so they must be a single key word
pub fn validate_username(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PerilError::validation("username cannot be empty"));
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '#'))
    {
        return Err(PerilError::validation(format!(
            "username '{}' may not contain whitespace, '.', '*' or '#'",
            name
        )));
    }
    Ok(name.to_string())
}

/// The three subscriptions a connected player holds
pub struct ClientSession {
    pub pause: Subscription,
    pub moves: Subscription,
    pub wars: Subscription,
}

/// Subscribe `game`'s player to pause broadcasts, army moves and wars
///
/// Fails on the first subscription that cannot be set up.
pub async fn join_game<B: Broker>(
    subscriber: &Subscriber<B>,
    publisher: Publisher<B::Channel>,
    routing: &RoutingTable,
    game: GameHandle,
) -> Result<ClientSession> {
    let username = game.username().to_string();

    let subscribe_args = |kind: MessageKind| {
        (
            routing.exchange_for(kind).to_string(),
            routing.queue_name(kind, &username),
            routing.binding_key(kind),
            kind.durability(),
        )
    };

    let (exchange, queue, key, durability) = subscribe_args(MessageKind::PlayingState);
    let pause = subscriber
        .subscribe(
            JsonCodec,
            &exchange,
            &queue,
            &key,
            durability,
            PauseHandler::new(game.clone()),
        )
        .await?;

    let (exchange, queue, key, durability) = subscribe_args(MessageKind::ArmyMove);
    let moves = subscriber
        .subscribe(
            JsonCodec,
            &exchange,
            &queue,
            &key,
            durability,
            MoveHandler::new(game.clone(), publisher.clone(), routing.clone()),
        )
        .await?;

    let (exchange, queue, key, durability) = subscribe_args(MessageKind::WarRecognition);
    let wars = subscriber
        .subscribe(
            JsonCodec,
            &exchange,
            &queue,
            &key,
            durability,
            WarHandler::new(game, publisher, routing.clone()),
        )
        .await?;

    info!("{} joined the game", username);
    Ok(ClientSession { pause, moves, wars })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  alice ").unwrap(), "alice");
        assert!(validate_username("").is_err());
        assert!(validate_username("al ice").is_err());
        assert!(validate_username("al.ice").is_err());
        assert!(validate_username("*").is_err());
    }
}
