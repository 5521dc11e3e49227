//! Where each message kind travels: exchange, routing keys, queue names,
//! durability and encoding

use crate::error::Result;
use crate::pubsub::{BrokerChannel, Durability, Encoding, ExchangeKind, Topology};
use serde::{Deserialize, Serialize};

pub const DIRECT_EXCHANGE: &str = "peril_direct";
pub const TOPIC_EXCHANGE: &str = "peril_topic";
pub const DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war_recognitions";
pub const GAME_LOGS_PREFIX: &str = "game_logs";

/// Queue shared by every client, so each war is resolved once
pub const WAR_QUEUE: &str = "war";

/// Logical message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PlayingState,
    ArmyMove,
    WarRecognition,
    GameLog,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::PlayingState,
        MessageKind::ArmyMove,
        MessageKind::WarRecognition,
        MessageKind::GameLog,
    ];

    pub fn durability(&self) -> Durability {
        match self {
            MessageKind::PlayingState | MessageKind::ArmyMove => Durability::Transient,
            MessageKind::WarRecognition | MessageKind::GameLog => Durability::Durable,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            MessageKind::GameLog => Encoding::Binary,
            _ => Encoding::Structured,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            MessageKind::PlayingState => PAUSE_KEY,
            MessageKind::ArmyMove => ARMY_MOVES_PREFIX,
            MessageKind::WarRecognition => WAR_RECOGNITIONS_PREFIX,
            MessageKind::GameLog => GAME_LOGS_PREFIX,
        }
    }
}

/// Exchange names; doubles as the `routing` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    pub direct_exchange: String,
    pub topic_exchange: String,
    pub dead_letter_exchange: String,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            direct_exchange: DIRECT_EXCHANGE.to_string(),
            topic_exchange: TOPIC_EXCHANGE.to_string(),
            dead_letter_exchange: DEAD_LETTER_EXCHANGE.to_string(),
        }
    }
}

impl RoutingTable {
    pub fn exchange_for(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::PlayingState => &self.direct_exchange,
            _ => &self.topic_exchange,
        }
    }

    /// Every exchange the server declares, with its kind
    pub fn exchanges(&self) -> [(&str, ExchangeKind); 3] {
        [
            (self.direct_exchange.as_str(), ExchangeKind::Direct),
            (self.topic_exchange.as_str(), ExchangeKind::Topic),
            (self.dead_letter_exchange.as_str(), ExchangeKind::Fanout),
        ]
    }

    /// Declare every exchange; safe to call from each process at startup
    pub async fn declare_exchanges<C: BrokerChannel>(
        &self,
        topology: &Topology,
        channel: &C,
    ) -> Result<()> {
        for (name, kind) in self.exchanges() {
            topology.declare_exchange(channel, name, kind).await?;
        }
        Ok(())
    }

    /// Routing key a message from `sender` is published under
    pub fn publish_key(&self, kind: MessageKind, sender: &str) -> String {
        match kind {
            MessageKind::PlayingState => PAUSE_KEY.to_string(),
            _ => format!("{}.{}", kind.prefix(), sender),
        }
    }

    /// Binding key a consumer of `kind` listens on
    pub fn binding_key(&self, kind: MessageKind) -> String {
        match kind {
            MessageKind::PlayingState => PAUSE_KEY.to_string(),
            _ => format!("{}.*", kind.prefix()),
        }
    }

    /// Queue that `username` consumes `kind` from
    ///
    /// Pause and move queues are per player; wars and logs use shared queues.
    pub fn queue_name(&self, kind: MessageKind, username: &str) -> String {
        match kind {
            MessageKind::PlayingState | MessageKind::ArmyMove => {
                format!("{}.{}", kind.prefix(), username)
            }
            MessageKind::WarRecognition => WAR_QUEUE.to_string(),
            MessageKind::GameLog => GAME_LOGS_PREFIX.to_string(),
        }
    }
}
