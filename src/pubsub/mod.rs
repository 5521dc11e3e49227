//! Typed publish/subscribe over an AMQP broker
//!
//! This module handles:
//! - Encoding payloads as JSON or MessagePack
//! - Declaring exchanges, queues and bindings
//! - Publishing without waiting for confirmation
//! - Consuming with a prefetch limit and settling every delivery exactly once

pub mod broker;
pub mod codec;
pub mod connection;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod publisher;
pub mod subscriber;
pub mod topology;

pub use broker::{Broker, BrokerChannel, Delivery, DeliveryStream, ExchangeKind};
pub use codec::{Codec, Encoding, JsonCodec, MsgPackCodec};
pub use connection::{AmqpConfig, AmqpConnection};
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryBroker;
pub use publisher::Publisher;
pub use subscriber::{
    FnHandler, MessageHandler, Subscriber, Subscription, Verdict, DEFAULT_PREFETCH_COUNT,
};
pub use topology::{Durability, QueueDescriptor, Topology};
