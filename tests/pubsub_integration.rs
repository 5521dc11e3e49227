//! Subscription behaviour against the in-memory broker
//!
//! Covers settlement verdicts, dead-lettering, prefetch and the metrics the
//! dispatch loop records.

mod fixtures;

use async_trait::async_trait;
use fixtures::{seen_count, wait_until, RecordingHandler, TestWorld};
use peril::error::PerilError;
use peril::metrics::MetricsCollector;
use peril::pubsub::{
    Broker, BrokerChannel, Durability, JsonCodec, MessageHandler, Subscriber, Topology, Verdict,
};
use peril::types::PlayingState;
use std::sync::Arc;
use tokio::sync::Semaphore;

const EXCHANGE: &str = "peril_topic";

async fn publish_raw(world: &TestWorld, key: &str, body: &[u8]) {
    world
        .publisher
        .channel()
        .publish(EXCHANGE, key, "application/json", body.to_vec())
        .await
        .expect("publish raw body");
}

async fn publish_state(world: &TestWorld, key: &str, is_paused: bool) {
    world
        .publisher
        .publish_json(EXCHANGE, key, &PlayingState { is_paused })
        .await
        .expect("publish state");
}

#[tokio::test]
async fn undecodable_message_is_dead_lettered_and_loop_keeps_running() {
    let world = TestWorld::new().await;
    let handler = RecordingHandler::<PlayingState>::acking();
    let seen = handler.seen();

    let subscription = world
        .subscriber
        .subscribe(JsonCodec, EXCHANGE, "audit", "audit.*", Durability::Durable, handler)
        .await
        .unwrap();

    publish_raw(&world, "audit.alice", b"{not json").await;
    publish_state(&world, "audit.alice", true).await;

    wait_until("both deliveries settled", || {
        let stats = world.broker.stats();
        stats.acked + stats.discarded == 2
    })
    .await;

    let stats = world.broker.stats();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(seen_count(&seen), 1, "the handler never sees undecodable bodies");
    assert!(subscription.is_running());

    let dead = world.broker.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].queue, "audit");
    assert_eq!(dead[0].dead_letter_exchange, world.routing.dead_letter_exchange);
    assert_eq!(dead[0].message.body, b"{not json".to_vec());
}

#[tokio::test]
async fn discard_on_transient_queue_is_not_dead_lettered() {
    let world = TestWorld::new().await;
    let handler = RecordingHandler::<PlayingState>::new(Vec::new(), Verdict::NackDiscard);
    let seen = handler.seen();

    world
        .subscriber
        .subscribe(JsonCodec, EXCHANGE, "scratch", "scratch.*", Durability::Transient, handler)
        .await
        .unwrap();
    publish_state(&world, "scratch.bob", false).await;

    wait_until("discard", || world.broker.stats().discarded == 1).await;
    assert_eq!(seen_count(&seen), 1);
    assert!(world.broker.dead_letters().is_empty());
    assert_eq!(world.broker.queue_depth("scratch"), 0);
}

#[tokio::test]
async fn requeued_message_is_redelivered() {
    let world = TestWorld::new().await;
    let handler = RecordingHandler::<PlayingState>::new(vec![Verdict::NackRequeue], Verdict::Ack);
    let seen = handler.seen();

    world
        .subscriber
        .subscribe(JsonCodec, EXCHANGE, "retry", "retry.*", Durability::Durable, handler)
        .await
        .unwrap();
    publish_state(&world, "retry.carol", true).await;

    wait_until("redelivered message acked", || world.broker.stats().acked == 1).await;

    let stats = world.broker.stats();
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.discarded, 0);
    assert_eq!(seen_count(&seen), 2);
    assert_eq!(world.broker.unacked_count(), 0);
}

#[tokio::test]
async fn subscribing_twice_reuses_queue_and_binding() {
    let world = TestWorld::new().await;

    for _ in 0..2 {
        world
            .subscriber
            .subscribe(
                JsonCodec,
                EXCHANGE,
                "shared",
                "shared.*",
                Durability::Durable,
                RecordingHandler::<PlayingState>::acking(),
            )
            .await
            .unwrap();
    }

    assert_eq!(world.broker.binding_count("shared"), 1);
    assert_eq!(world.broker.consumer_count("shared"), 2);
}

#[tokio::test]
async fn conflicting_redeclare_is_a_setup_error() {
    let world = TestWorld::new().await;
    world
        .subscriber
        .subscribe(
            JsonCodec,
            EXCHANGE,
            "flip",
            "flip.*",
            Durability::Durable,
            RecordingHandler::<PlayingState>::acking(),
        )
        .await
        .unwrap();

    let result = world
        .subscriber
        .subscribe(
            JsonCodec,
            EXCHANGE,
            "flip",
            "flip.*",
            Durability::Transient,
            RecordingHandler::<PlayingState>::acking(),
        )
        .await;
    assert!(matches!(result, Err(PerilError::Setup { .. })));
}

#[tokio::test]
async fn subscribing_to_missing_exchange_fails() {
    let world = TestWorld::new().await;
    let result = world
        .subscriber
        .subscribe(
            JsonCodec,
            "nowhere",
            "orphan",
            "#",
            Durability::Durable,
            RecordingHandler::<PlayingState>::acking(),
        )
        .await;

    assert!(matches!(result, Err(PerilError::Setup { .. })));
    assert_eq!(world.broker.consumer_count("orphan"), 0);
}

/// Holds every message until a permit is released
struct GatedHandler {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl MessageHandler<PlayingState> for GatedHandler {
    async fn handle(&self, _message: PlayingState) -> Verdict {
        match self.gate.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Verdict::NackRequeue,
        }
        Verdict::Ack
    }
}

#[tokio::test]
async fn prefetch_limits_unacknowledged_deliveries() {
    let world = TestWorld::new().await;
    let gate = Arc::new(Semaphore::new(0));

    world
        .subscriber
        .subscribe(
            JsonCodec,
            EXCHANGE,
            "slow",
            "slow.*",
            Durability::Durable,
            GatedHandler { gate: gate.clone() },
        )
        .await
        .unwrap();

    for _ in 0..25 {
        publish_state(&world, "slow.dave", false).await;
    }

    wait_until("prefetch window filled", || world.broker.unacked_on("slow") == 10).await;
    assert_eq!(world.broker.queue_depth("slow"), 15);

    gate.add_permits(25);
    wait_until("all deliveries acked", || world.broker.stats().acked == 25).await;
    assert_eq!(world.broker.unacked_count(), 0);
    assert_eq!(world.broker.queue_depth("slow"), 0);
}

#[tokio::test]
async fn dispatcher_and_publisher_record_metrics() {
    let world = TestWorld::new().await;
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let subscriber = Subscriber::new(
        Arc::new(world.broker.clone()),
        Topology::new(world.routing.dead_letter_exchange.clone()),
    )
    .with_metrics(metrics.clone());
    let publisher = peril::pubsub::Publisher::new(world.broker.open_channel().await.unwrap())
        .with_metrics(metrics.clone());

    subscriber
        .subscribe(
            JsonCodec,
            EXCHANGE,
            "metered",
            "metered.*",
            Durability::Durable,
            RecordingHandler::<PlayingState>::acking(),
        )
        .await
        .unwrap();
    assert_eq!(metrics.subscriptions.get(), 1);

    publisher
        .publish_json(EXCHANGE, "metered.erin", &PlayingState { is_paused: true })
        .await
        .unwrap();
    publish_raw(&world, "metered.erin", b"garbage").await;

    world.broker.fail_next_publishes(1);
    assert!(publisher
        .publish_json(EXCHANGE, "metered.erin", &PlayingState { is_paused: false })
        .await
        .is_err());

    wait_until("both deliveries settled", || {
        metrics.delivery_count("metered", Verdict::Ack) == 1
            && metrics.delivery_count("metered", Verdict::NackDiscard) == 1
    })
    .await;

    assert_eq!(metrics.decode_failure_count("metered"), 1);
    assert_eq!(metrics.publish_count(EXCHANGE, true), 1);
    assert_eq!(metrics.publish_count(EXCHANGE, false), 1);
    assert!(metrics.encode_text().unwrap().contains("metered"));
}
