//! In-process broker with AMQP routing and acknowledgement semantics
//!
//! Backs the test suites and is only built for tests or with the
//! `test-support` feature. Direct, topic and fanout routing, per-consumer prefetch, requeue with the
//! redelivered flag and dead-lettering of discarded messages all behave the
//! way RabbitMQ does for the subset of features peril uses.

use crate::error::{PerilError, Result};
use crate::pubsub::broker::{Broker, BrokerChannel, Delivery, DeliveryStream, ExchangeKind};
use crate::pubsub::topology::QueueDescriptor;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

/// A message as it was handed to an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// A message removed from `queue` by a discarding nack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub dead_letter_exchange: String,
    pub message: PublishedMessage,
}

/// Settlement counters across every queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementStats {
    pub acked: usize,
    pub requeued: usize,
    pub discarded: usize,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    message: PublishedMessage,
    redelivered: bool,
}

struct Consumer {
    tag: String,
    prefetch: u16,
    in_flight: usize,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl Consumer {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < self.prefetch as usize
    }
}

struct QueueState {
    descriptor: QueueDescriptor,
    ready: VecDeque<QueuedMessage>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
}

struct Unacked {
    queue: String,
    consumer_tag: String,
    message: QueuedMessage,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, (ExchangeKind, bool)>,
    queues: HashMap<String, QueueState>,
    /// (queue, exchange, routing key)
    bindings: Vec<(String, String, String)>,
    unacked: BTreeMap<u64, Unacked>,
    next_delivery_tag: u64,
    published: Vec<PublishedMessage>,
    dead_letters: Vec<DeadLetter>,
    stats: SettlementStats,
    failing_publishes: usize,
}

impl BrokerState {
    fn route(&mut self, message: PublishedMessage) -> Result<()> {
        let kind = match self.exchanges.get(&message.exchange) {
            Some((kind, _)) => *kind,
            None => {
                return Err(PerilError::transport(format!(
                    "no exchange '{}'",
                    message.exchange
                )))
            }
        };

        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|(_, exchange, key)| {
                exchange == &message.exchange && key_matches(kind, key, &message.routing_key)
            })
            .map(|(queue, _, _)| queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        trace!(
            "'{}' with key '{}' routed to {:?}",
            message.exchange,
            message.routing_key,
            targets
        );

        for queue in targets {
            if let Some(state) = self.queues.get_mut(&queue) {
                state.ready.push_back(QueuedMessage {
                    message: message.clone(),
                    redelivered: false,
                });
            }
            self.pump(&queue);
        }
        Ok(())
    }

    /// Drop consumers whose stream was closed and requeue what they held
    fn drop_closed_consumers(&mut self, queue_name: &str) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };
        let closed: Vec<String> = queue
            .consumers
            .iter()
            .filter(|c| c.sender.is_closed())
            .map(|c| c.tag.clone())
            .collect();
        if closed.is_empty() {
            return;
        }

        queue.consumers.retain(|c| !c.sender.is_closed());
        queue.next_consumer = 0;

        let orphaned: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.queue == queue_name && closed.contains(&u.consumer_tag))
            .map(|(tag, _)| *tag)
            .collect();
        // newest first so the oldest ends up at the head of the queue
        for delivery_tag in orphaned.into_iter().rev() {
            if let Some(mut unacked) = self.unacked.remove(&delivery_tag) {
                unacked.message.redelivered = true;
                queue.ready.push_front(unacked.message);
            }
        }
        debug!(
            "Consumers {:?} on '{}' went away, {} message(s) ready",
            closed,
            queue_name,
            queue.ready.len()
        );
    }

    /// Hand ready messages to consumers with spare prefetch capacity
    fn pump(&mut self, queue_name: &str) {
        self.drop_closed_consumers(queue_name);
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };
        let mut lost_consumer = false;

        while !queue.ready.is_empty() && !queue.consumers.is_empty() {
            let count = queue.consumers.len();
            let Some(index) = (0..count)
                .map(|offset| (queue.next_consumer + offset) % count)
                .find(|&i| queue.consumers[i].has_capacity())
            else {
                break;
            };

            let Some(queued) = queue.ready.pop_front() else {
                break;
            };
            self.next_delivery_tag += 1;
            let delivery_tag = self.next_delivery_tag;

            let consumer = &mut queue.consumers[index];
            let delivery = Delivery {
                delivery_tag,
                exchange: queued.message.exchange.clone(),
                routing_key: queued.message.routing_key.clone(),
                content_type: Some(queued.message.content_type.clone()),
                redelivered: queued.redelivered,
                body: queued.message.body.clone(),
            };

            if consumer.sender.send(delivery).is_err() {
                queue.ready.push_front(queued);
                lost_consumer = true;
                break;
            }

            consumer.in_flight += 1;
            self.unacked.insert(
                delivery_tag,
                Unacked {
                    queue: queue_name.to_string(),
                    consumer_tag: consumer.tag.clone(),
                    message: queued,
                },
            );
            queue.next_consumer = (index + 1) % count;
        }

        if lost_consumer {
            self.pump(queue_name);
        }
    }

    fn settle(&mut self, delivery_tag: u64) -> Result<Unacked> {
        let unacked = self
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| PerilError::transport(format!("unknown delivery tag {}", delivery_tag)))?;

        if let Some(queue) = self.queues.get_mut(&unacked.queue) {
            if let Some(consumer) = queue
                .consumers
                .iter_mut()
                .find(|c| c.tag == unacked.consumer_tag)
            {
                consumer.in_flight = consumer.in_flight.saturating_sub(1);
            }
        }
        Ok(unacked)
    }
}

/// Match `routing_key` against a binding key for `kind`
pub fn key_matches(kind: ExchangeKind, binding_key: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Fanout => true,
        ExchangeKind::Direct => binding_key == routing_key,
        ExchangeKind::Topic => {
            let pattern: Vec<&str> = binding_key.split('.').collect();
            let words: Vec<&str> = routing_key.split('.').collect();
            topic_matches(&pattern, &words)
        }
    }
}

fn topic_matches(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| topic_matches(rest, &words[skip..])),
        Some((&head, rest)) => match words.split_first() {
            Some((&word, remaining)) => (head == "*" || head == word) && topic_matches(rest, remaining),
            None => false,
        },
    }
}

/// Shared in-memory broker; clones refer to the same state
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every message accepted by an exchange, in publish order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn published_to(&self, exchange: &str) -> Vec<PublishedMessage> {
        self.state()
            .published
            .iter()
            .filter(|m| m.exchange == exchange)
            .cloned()
            .collect()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().dead_letters.clone()
    }

    pub fn stats(&self) -> SettlementStats {
        self.state().stats
    }

    /// Messages waiting for a consumer
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Deliveries handed out and not yet settled
    pub fn unacked_count(&self) -> usize {
        self.state().unacked.len()
    }

    pub fn unacked_on(&self, queue: &str) -> usize {
        self.state()
            .unacked
            .values()
            .filter(|u| u.queue == queue)
            .count()
    }

    pub fn binding_count(&self, queue: &str) -> usize {
        self.state()
            .bindings
            .iter()
            .filter(|(q, _, _)| q == queue)
            .count()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.consumers.len())
    }

    pub fn queue(&self, name: &str) -> Option<QueueDescriptor> {
        self.state().queues.get(name).map(|q| q.descriptor.clone())
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state().exchanges.contains_key(name)
    }

    /// Make the next `count` publishes fail with a transport error
    pub fn fail_next_publishes(&self, count: usize) {
        self.state().failing_publishes = count;
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Channel = MemoryChannel;

    async fn open_channel(&self) -> Result<MemoryChannel> {
        Ok(MemoryChannel {
            broker: self.clone(),
            prefetch: Arc::new(AtomicU16::new(0)),
        })
    }
}

/// Channel onto a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryChannel {
    broker: MemoryBroker,
    prefetch: Arc<AtomicU16>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()> {
        let mut state = self.broker.state();
        match state.exchanges.get(name).copied() {
            Some(existing) if existing != (kind, durable) => Err(PerilError::setup(format!(
                "exchange '{}' already declared as {} (durable: {})",
                name,
                existing.0.as_str(),
                existing.1
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), (kind, durable));
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, queue: &QueueDescriptor) -> Result<String> {
        let mut state = self.broker.state();
        let name = if queue.name().is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4())
        } else {
            queue.name().to_string()
        };

        let conflicting = state.queues.get(&name).map(|existing| {
            let declared = &existing.descriptor;
            declared.durability() != queue.durability()
                || declared.exclusive() != queue.exclusive()
                || declared.auto_delete() != queue.auto_delete()
        });

        match conflicting {
            Some(true) => Err(PerilError::setup(format!(
                "queue '{}' already declared with different arguments",
                name
            ))),
            Some(false) => Ok(name),
            None => {
                state.queues.insert(
                    name.clone(),
                    QueueState {
                        descriptor: queue.clone(),
                        ready: VecDeque::new(),
                        consumers: Vec::new(),
                        next_consumer: 0,
                    },
                );
                Ok(name)
            }
        }
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.broker.state();
        if !state.queues.contains_key(queue) {
            return Err(PerilError::setup(format!("no queue '{}'", queue)));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(PerilError::setup(format!("no exchange '{}'", exchange)));
        }

        let binding = (queue.to_string(), exchange.to_string(), routing_key.to_string());
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.prefetch.store(count, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        let mut state = self.broker.state();
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(PerilError::transport("connection reset"));
        }

        let message = PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            content_type: content_type.to_string(),
            body,
        };
        state.route(message.clone())?;
        state.published.push(message);
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.broker.state();

        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| PerilError::setup(format!("no queue '{}'", queue)))?;
        queue_state.consumers.push(Consumer {
            tag: consumer_tag.to_string(),
            prefetch: self.prefetch.load(Ordering::SeqCst),
            in_flight: 0,
            sender,
        });
        state.pump(queue);

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.broker.state();
        let unacked = state.settle(delivery_tag)?;
        state.stats.acked += 1;
        state.pump(&unacked.queue);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let mut state = self.broker.state();
        let mut unacked = state.settle(delivery_tag)?;

        if requeue {
            state.stats.requeued += 1;
            unacked.message.redelivered = true;
            if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                queue.ready.push_front(unacked.message);
            }
        } else {
            state.stats.discarded += 1;
            let dead_letter_exchange = state
                .queues
                .get(&unacked.queue)
                .and_then(|q| q.descriptor.dead_letter_exchange().map(str::to_string));

            if let Some(dlx) = dead_letter_exchange {
                let mut message = unacked.message.message;
                state.dead_letters.push(DeadLetter {
                    queue: unacked.queue.clone(),
                    dead_letter_exchange: dlx.clone(),
                    message: message.clone(),
                });
                if state.exchanges.contains_key(&dlx) {
                    message.exchange = dlx;
                    state.route(message)?;
                }
            }
        }

        state.pump(&unacked.queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::topology::Durability;
    use tokio_stream::StreamExt;

    async fn declared(kind: ExchangeKind, queue: &str, key: &str) -> (MemoryBroker, MemoryChannel) {
        let broker = MemoryBroker::new();
        let channel = broker.open_channel().await.unwrap();
        channel.declare_exchange("ex", kind, true).await.unwrap();
        channel
            .declare_queue(&QueueDescriptor::new(queue, Durability::Durable, "dlx"))
            .await
            .unwrap();
        channel.bind_queue(queue, "ex", key).await.unwrap();
        (broker, channel)
    }

    #[test]
    fn test_topic_wildcards() {
        assert!(key_matches(ExchangeKind::Topic, "army_moves.*", "army_moves.bob"));
        assert!(!key_matches(ExchangeKind::Topic, "army_moves.*", "army_moves"));
        assert!(!key_matches(ExchangeKind::Topic, "army_moves.*", "army_moves.bob.extra"));
        assert!(key_matches(ExchangeKind::Topic, "game_logs.#", "game_logs"));
        assert!(key_matches(ExchangeKind::Topic, "game_logs.#", "game_logs.a.b"));
        assert!(key_matches(ExchangeKind::Topic, "#", "anything.at.all"));
        assert!(!key_matches(ExchangeKind::Direct, "pause", "pause.alice"));
        assert!(key_matches(ExchangeKind::Fanout, "", "whatever"));
    }

    #[tokio::test]
    async fn test_unroutable_messages_are_dropped() {
        let (broker, channel) = declared(ExchangeKind::Direct, "q", "pause").await;
        channel
            .publish("ex", "other", "application/json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("q"), 0);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_prefetch_limits_in_flight_deliveries() {
        let (broker, channel) = declared(ExchangeKind::Direct, "q", "k").await;
        for _ in 0..5 {
            channel
                .publish("ex", "k", "application/json", b"1".to_vec())
                .await
                .unwrap();
        }
        channel.set_prefetch(2).await.unwrap();
        let mut stream = channel.consume("q", "c1").await.unwrap();

        let first = stream.next().await.unwrap();
        let _second = stream.next().await.unwrap();
        assert_eq!(broker.unacked_count(), 2);
        assert_eq!(broker.queue_depth("q"), 3);

        channel.ack(first.delivery_tag).await.unwrap();
        let _third = stream.next().await.unwrap();
        assert_eq!(broker.unacked_count(), 2);
        assert_eq!(broker.queue_depth("q"), 2);
    }

    #[tokio::test]
    async fn test_requeue_marks_redelivered() {
        let (_broker, channel) = declared(ExchangeKind::Direct, "q", "k").await;
        channel
            .publish("ex", "k", "application/json", b"1".to_vec())
            .await
            .unwrap();
        let mut stream = channel.consume("q", "c1").await.unwrap();

        let first = stream.next().await.unwrap();
        assert!(!first.redelivered);
        channel.nack(first.delivery_tag, true).await.unwrap();

        let again = stream.next().await.unwrap();
        assert!(again.redelivered);
        assert_eq!(again.body, first.body);
        assert_ne!(again.delivery_tag, first.delivery_tag);
    }

    #[tokio::test]
    async fn test_discard_dead_letters_durable_queues() {
        let (broker, channel) = declared(ExchangeKind::Direct, "q", "k").await;
        channel
            .publish("ex", "k", "application/json", b"bad".to_vec())
            .await
            .unwrap();
        let mut stream = channel.consume("q", "c1").await.unwrap();
        let delivery = stream.next().await.unwrap();

        channel.nack(delivery.delivery_tag, false).await.unwrap();

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].queue, "q");
        assert_eq!(dead[0].dead_letter_exchange, "dlx");
        assert_eq!(broker.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_settling_twice_fails() {
        let (_broker, channel) = declared(ExchangeKind::Direct, "q", "k").await;
        channel
            .publish("ex", "k", "application/json", b"1".to_vec())
            .await
            .unwrap();
        let mut stream = channel.consume("q", "c1").await.unwrap();
        let delivery = stream.next().await.unwrap();

        channel.ack(delivery.delivery_tag).await.unwrap();
        let err = channel.ack(delivery.delivery_tag).await.unwrap_err();
        assert!(matches!(err, PerilError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_redeclaring_with_other_arguments_fails() {
        let (_broker, channel) = declared(ExchangeKind::Direct, "q", "k").await;
        let err = channel
            .declare_queue(&QueueDescriptor::new("q", Durability::Transient, "dlx"))
            .await
            .unwrap_err();
        assert!(matches!(err, PerilError::Setup { .. }));

        let err = channel
            .declare_exchange("ex", ExchangeKind::Topic, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PerilError::Setup { .. }));
    }

    #[tokio::test]
    async fn test_consumers_share_a_queue_round_robin() {
        let (_broker, channel) = declared(ExchangeKind::Direct, "q", "k").await;
        let mut a = channel.consume("q", "a").await.unwrap();
        let mut b = channel.consume("q", "b").await.unwrap();

        channel
            .publish("ex", "k", "application/json", b"1".to_vec())
            .await
            .unwrap();
        channel
            .publish("ex", "k", "application/json", b"2".to_vec())
            .await
            .unwrap();

        assert_eq!(a.next().await.unwrap().body, b"1".to_vec());
        assert_eq!(b.next().await.unwrap().body, b"2".to_vec());
    }

    #[tokio::test]
    async fn test_dropped_consumer_returns_unacked_messages() {
        let (broker, channel) = declared(ExchangeKind::Direct, "q", "k").await;
        channel
            .publish("ex", "k", "application/json", b"1".to_vec())
            .await
            .unwrap();

        let mut first = channel.consume("q", "c1").await.unwrap();
        let delivery = first.next().await.unwrap();
        assert!(!delivery.redelivered);
        assert_eq!(broker.unacked_on("q"), 1);
        drop(first);

        let mut second = channel.consume("q", "c2").await.unwrap();
        let again = second.next().await.unwrap();
        assert!(again.redelivered);
        assert_eq!(again.body, b"1".to_vec());
        assert_eq!(broker.unacked_count(), 1);
        assert_eq!(broker.consumer_count("q"), 1);

        // the old tag no longer settles anything
        assert!(channel.ack(delivery.delivery_tag).await.is_err());
        channel.ack(again.delivery_tag).await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
    }
}
