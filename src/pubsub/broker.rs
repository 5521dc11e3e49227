//! Broker abstraction consumed by the topology, publisher and dispatcher
//!
//! The AMQP implementation lives in [`crate::pubsub::connection`]; an
//! in-process implementation lives in [`crate::pubsub::memory`].

use crate::error::Result;
use crate::pubsub::codec::Encoding;
use crate::pubsub::topology::QueueDescriptor;
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// A message handed to a consumer, not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub content_type: Option<String>,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

impl Delivery {
    /// Encoding announced by the publisher, if recognised
    pub fn encoding(&self) -> Option<Encoding> {
        self.content_type
            .as_deref()
            .and_then(Encoding::from_content_type)
    }
}

/// Deliveries for one consumer, in broker order
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Exchange routing rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Direct,
    Topic,
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

/// Operations needed from a broker channel
#[async_trait]
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()>;

    /// Declare a queue and return the name the broker assigned
    async fn declare_queue(&self, queue: &QueueDescriptor) -> Result<String>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Cap the number of unacknowledged deliveries per consumer on this channel
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<()>;

    /// Start a manually-acknowledged consumer
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

/// A connection able to open channels
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Channel: BrokerChannel;

    async fn open_channel(&self) -> Result<Self::Channel>;
}
