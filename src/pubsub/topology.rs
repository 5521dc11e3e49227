//! Exchange, queue and binding declarations

use crate::error::{PerilError, Result};
use crate::pubsub::broker::{BrokerChannel, ExchangeKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Whether a queue outlives the connection that declared it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Durable,
    Transient,
}

impl Durability {
    pub fn is_durable(&self) -> bool {
        matches!(self, Durability::Durable)
    }
}

/// Queue declaration arguments
///
/// Exclusivity and auto-delete follow from durability: transient queues are
/// always exclusive and auto-deleted, durable queues are neither and carry
/// a dead-letter exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    name: String,
    durability: Durability,
    exclusive: bool,
    auto_delete: bool,
    dead_letter_exchange: Option<String>,
}

impl QueueDescriptor {
    pub fn new(name: impl Into<String>, durability: Durability, dead_letter_exchange: &str) -> Self {
        let durable = durability.is_durable();
        Self {
            name: name.into(),
            durability,
            exclusive: !durable,
            auto_delete: !durable,
            dead_letter_exchange: durable.then(|| dead_letter_exchange.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.dead_letter_exchange.as_deref()
    }

    fn renamed(mut self, name: String) -> Self {
        self.name = name;
        self
    }
}

/// Declares broker entities; every operation is safe to repeat
#[derive(Debug, Clone)]
pub struct Topology {
    dead_letter_exchange: String,
}

impl Topology {
    pub fn new(dead_letter_exchange: impl Into<String>) -> Self {
        Self {
            dead_letter_exchange: dead_letter_exchange.into(),
        }
    }

    pub fn dead_letter_exchange(&self) -> &str {
        &self.dead_letter_exchange
    }

    pub async fn declare_exchange<C: BrokerChannel>(
        &self,
        channel: &C,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<()> {
        channel
            .declare_exchange(name, kind, true)
            .await
            .map_err(|e| PerilError::setup(format!("exchange {}: {}", name, e)))?;
        debug!("Exchange '{}' ({}) declared", name, kind.as_str());
        Ok(())
    }

    /// Declare the fanout exchange that receives discarded messages
    pub async fn declare_dead_letter_exchange<C: BrokerChannel>(&self, channel: &C) -> Result<()> {
        self.declare_exchange(channel, &self.dead_letter_exchange, ExchangeKind::Fanout)
            .await
    }

    /// Declare `queue_name` and bind it to `exchange` under `routing_key`
    pub async fn declare_and_bind<C: BrokerChannel>(
        &self,
        channel: &C,
        exchange: &str,
        queue_name: &str,
        routing_key: &str,
        durability: Durability,
    ) -> Result<QueueDescriptor> {
        let descriptor = QueueDescriptor::new(queue_name, durability, &self.dead_letter_exchange);

        let declared_name = channel
            .declare_queue(&descriptor)
            .await
            .map_err(|e| PerilError::setup(format!("queue {}: {}", queue_name, e)))?;

        channel
            .bind_queue(&declared_name, exchange, routing_key)
            .await
            .map_err(|e| {
                PerilError::setup(format!(
                    "binding {} to {} with '{}': {}",
                    declared_name, exchange, routing_key, e
                ))
            })?;

        info!(
            "Queue '{}' ({:?}) bound to '{}' with key '{}'",
            declared_name, durability, exchange, routing_key
        );
        Ok(descriptor.renamed(declared_name))
    }
}
