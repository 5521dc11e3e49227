//! Message handlers for the three queues a client consumes
//!
//! Each handler forwards the decoded message to the game state owner and
//! maps the outcome to a [`Verdict`]. Handlers that must publish a follow-up
//! message only acknowledge once that publish succeeded.

use crate::game::{GameHandle, MoveOutcome, WarOutcome};
use crate::pubsub::{BrokerChannel, MessageHandler, Publisher, Verdict};
use crate::routing::{MessageKind, RoutingTable};
use crate::types::{ArmyMove, GameLog, PlayingState, RecognitionOfWar};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Applies pause/resume broadcasts; never rejects one
pub struct PauseHandler {
    game: GameHandle,
}

impl PauseHandler {
    pub fn new(game: GameHandle) -> Self {
        Self { game }
    }
}

#[async_trait]
impl MessageHandler<PlayingState> for PauseHandler {
    async fn handle(&self, state: PlayingState) -> Verdict {
        if let Err(e) = self.game.handle_pause(state).await {
            error!("Could not apply pause state for {}: {}", self.game.username(), e);
        }
        Verdict::Ack
    }
}

/// Receives other players' moves and declares war on collisions
pub struct MoveHandler<C: BrokerChannel> {
    game: GameHandle,
    publisher: Publisher<C>,
    routing: RoutingTable,
}

impl<C: BrokerChannel> MoveHandler<C> {
    pub fn new(game: GameHandle, publisher: Publisher<C>, routing: RoutingTable) -> Self {
        Self {
            game,
            publisher,
            routing,
        }
    }
}

#[async_trait]
impl<C: BrokerChannel> MessageHandler<ArmyMove> for MoveHandler<C> {
    async fn handle(&self, army_move: ArmyMove) -> Verdict {
        let outcome = match self.game.handle_move(army_move).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Move not applied: {}", e);
                return Verdict::NackRequeue;
            }
        };

        match outcome {
            MoveOutcome::Safe => Verdict::Ack,
            MoveOutcome::SamePlayer => Verdict::NackDiscard,
            MoveOutcome::MakeWar(war) => {
                let kind = MessageKind::WarRecognition;
                let key = self.routing.publish_key(kind, self.game.username());

                match self
                    .publisher
                    .publish_json(self.routing.exchange_for(kind), &key, &war)
                    .await
                {
                    Ok(()) => {
                        info!(
                            "Declared war: {} attacked {}",
                            war.attacker.username, war.defender.username
                        );
                        Verdict::Ack
                    }
                    Err(e) => {
                        warn!("Failed to publish war recognition: {}", e);
                        Verdict::NackRequeue
                    }
                }
            }
        }
    }
}

/// Resolves wars this player is part of and logs the result
pub struct WarHandler<C: BrokerChannel> {
    game: GameHandle,
    publisher: Publisher<C>,
    routing: RoutingTable,
}

impl<C: BrokerChannel> WarHandler<C> {
    pub fn new(game: GameHandle, publisher: Publisher<C>, routing: RoutingTable) -> Self {
        Self {
            game,
            publisher,
            routing,
        }
    }
}

#[async_trait]
impl<C: BrokerChannel> MessageHandler<RecognitionOfWar> for WarHandler<C> {
    async fn handle(&self, war: RecognitionOfWar) -> Verdict {
        // Nothing changes locally until the log is out, so a failed publish
        // can be redelivered and reach the same outcome.
        let resolution = match self.game.resolve_war(war.clone()).await {
            Ok(resolution) => resolution,
            Err(e) => {
                error!("War not resolved: {}", e);
                return Verdict::NackRequeue;
            }
        };

        let message = match &resolution.outcome {
            WarOutcome::NotInvolved => return Verdict::NackRequeue,
            WarOutcome::NoUnits => {
                warn!("War recognition without units at {}", war.location);
                return Verdict::NackDiscard;
            }
            resolved => match resolved.log_message() {
                Some(message) => message,
                None => return Verdict::NackDiscard,
            },
        };

        if resolution.committed {
            debug!("War at {} already logged, acking redelivery", war.location);
            return Verdict::Ack;
        }

        let username = self.game.username();
        let kind = MessageKind::GameLog;
        let log = GameLog::new(username, message);

        if let Err(e) = self
            .publisher
            .publish_binary(
                self.routing.exchange_for(kind),
                &self.routing.publish_key(kind, username),
                &log,
            )
            .await
        {
            warn!("Failed to publish game log for {}: {}", username, e);
            return Verdict::NackRequeue;
        }

        match self.game.commit_war(war).await {
            Ok(_) => Verdict::Ack,
            Err(e) => {
                error!("War outcome not applied: {}", e);
                Verdict::NackRequeue
            }
        }
    }
}
