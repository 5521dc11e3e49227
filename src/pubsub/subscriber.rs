//! Subscription setup and the per-queue dispatch loop
//!
//! Each subscription gets its own channel with a prefetch limit and its own
//! task. The task decodes every delivery, asks the handler for a [`Verdict`]
//! and settles the delivery with exactly one ack or nack. Nothing that happens
//! to a single message stops the loop.

use crate::error::{PerilError, Result};
use crate::metrics::MetricsCollector;
use crate::pubsub::broker::{Broker, BrokerChannel, Delivery, DeliveryStream};
use crate::pubsub::codec::Codec;
use crate::pubsub::topology::{Durability, QueueDescriptor, Topology};
use crate::utils::consumer_tag;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Default number of unacknowledged deliveries a consumer may hold
pub const DEFAULT_PREFETCH_COUNT: u16 = 10;

/// How a delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Processed; remove from the queue
    Ack,
    /// Not processed here; return it to the queue for redelivery
    NackRequeue,
    /// Unprocessable; remove it and dead-letter it
    NackDiscard,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ack => "ack",
            Verdict::NackRequeue => "nack_requeue",
            Verdict::NackDiscard => "nack_discard",
        }
    }
}

/// Behaviour for one message kind
#[async_trait]
pub trait MessageHandler<T>: Send + Sync + 'static {
    async fn handle(&self, message: T) -> Verdict;
}

/// Adapts an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Verdict> + Send + 'static,
{
    async fn handle(&self, message: T) -> Verdict {
        (self.0)(message).await
    }
}

/// Decode `body` and ask `handler` what to do with it
///
/// Undecodable bodies are discarded without reaching the handler.
pub async fn decide<T, K, H>(codec: &K, handler: &H, body: &[u8]) -> Result<Verdict>
where
    T: DeserializeOwned + Send + 'static,
    K: Codec,
    H: MessageHandler<T>,
{
    let message: T = codec.decode(body)?;
    Ok(handler.handle(message).await)
}

/// A running consumption loop
pub struct Subscription {
    queue: QueueDescriptor,
    consumer_tag: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn queue(&self) -> &QueueDescriptor {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// False once the broker closed the delivery stream
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Creates subscriptions against a broker
pub struct Subscriber<B: Broker> {
    broker: Arc<B>,
    topology: Topology,
    prefetch_count: u16,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<B: Broker> Subscriber<B> {
    pub fn new(broker: Arc<B>, topology: Topology) -> Self {
        Self {
            broker,
            topology,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            metrics: None,
        }
    }

    pub fn with_prefetch(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Declare and bind `queue_name`, then process its deliveries in a
    /// background task until the connection closes
    ///
    /// Returns as soon as the consumer is registered. Any setup failure is
    /// returned here and no task is started.
    pub async fn subscribe<T, K, H>(
        &self,
        codec: K,
        exchange: &str,
        queue_name: &str,
        routing_key: &str,
        durability: Durability,
        handler: H,
    ) -> Result<Subscription>
    where
        T: DeserializeOwned + Send + 'static,
        K: Codec,
        H: MessageHandler<T>,
    {
        let channel = self
            .broker
            .open_channel()
            .await
            .map_err(|e| PerilError::setup(format!("opening channel for {}: {}", queue_name, e)))?;

        let queue = self
            .topology
            .declare_and_bind(&channel, exchange, queue_name, routing_key, durability)
            .await?;

        channel
            .set_prefetch(self.prefetch_count)
            .await
            .map_err(|e| PerilError::setup(format!("prefetch for {}: {}", queue.name(), e)))?;

        let consumer_tag = consumer_tag(queue.name());
        let deliveries = channel
            .consume(queue.name(), &consumer_tag)
            .await
            .map_err(|e| PerilError::setup(format!("consuming {}: {}", queue.name(), e)))?;

        let dispatcher = Dispatcher {
            channel,
            codec,
            handler,
            queue: queue.name().to_string(),
            metrics: self.metrics.clone(),
            _message: PhantomData::<fn() -> T>,
        };
        let task = tokio::spawn(dispatcher.run(deliveries));
        if let Some(metrics) = &self.metrics {
            metrics.subscriptions.inc();
        }

        info!(
            "Subscribed to '{}' (prefetch {}, {})",
            queue.name(),
            self.prefetch_count,
            codec_name::<K>()
        );

        Ok(Subscription {
            queue,
            consumer_tag,
            task,
        })
    }
}

fn codec_name<K>() -> &'static str {
    std::any::type_name::<K>()
        .rsplit("::")
        .next()
        .unwrap_or("codec")
}

struct Dispatcher<C, K, H, T> {
    channel: C,
    codec: K,
    handler: H,
    queue: String,
    metrics: Option<Arc<MetricsCollector>>,
    _message: PhantomData<fn() -> T>,
}

impl<C, K, H, T> Dispatcher<C, K, H, T>
where
    C: BrokerChannel,
    K: Codec,
    H: MessageHandler<T>,
    T: DeserializeOwned + Send + 'static,
{
    async fn run(self, mut deliveries: DeliveryStream) {
        debug!("Dispatch loop for '{}' started", self.queue);

        while let Some(delivery) = deliveries.next().await {
            let verdict = self.verdict_for(&delivery).await;
            self.settle(delivery.delivery_tag, verdict).await;
        }

        info!("Delivery stream for '{}' closed", self.queue);
        if let Some(metrics) = &self.metrics {
            metrics.subscriptions.dec();
        }
    }

    async fn verdict_for(&self, delivery: &Delivery) -> Verdict {
        debug!(
            "Delivery {} on '{}' (key '{}', {} bytes{})",
            delivery.delivery_tag,
            self.queue,
            delivery.routing_key,
            delivery.body.len(),
            if delivery.redelivered { ", redelivered" } else { "" }
        );

        if let Some(encoding) = delivery.encoding() {
            if encoding != self.codec.encoding() {
                warn!(
                    "Delivery {} on '{}' announced {:?} but the queue expects {:?}",
                    delivery.delivery_tag,
                    self.queue,
                    encoding,
                    self.codec.encoding()
                );
            }
        }

        match decide(&self.codec, &self.handler, &delivery.body).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    "Discarding undecodable delivery {} on '{}': {}",
                    delivery.delivery_tag, self.queue, e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_decode_failure(&self.queue);
                }
                Verdict::NackDiscard
            }
        }
    }

    async fn settle(&self, delivery_tag: u64, verdict: Verdict) {
        let result = match verdict {
            Verdict::Ack => self.channel.ack(delivery_tag).await,
            Verdict::NackRequeue => self.channel.nack(delivery_tag, true).await,
            Verdict::NackDiscard => self.channel.nack(delivery_tag, false).await,
        };

        match result {
            Ok(()) => {
                debug!(
                    "Delivery {} on '{}' settled: {}",
                    delivery_tag,
                    self.queue,
                    verdict.as_str()
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_delivery(&self.queue, verdict);
                }
            }
            Err(e) => error!(
                "Failed to settle delivery {} on '{}' as {}: {}",
                delivery_tag,
                self.queue,
                verdict.as_str(),
                e
            ),
        }
    }
}
