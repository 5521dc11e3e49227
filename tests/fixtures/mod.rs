//! Test fixtures shared by the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use peril::client::{join_game, ClientSession, GameClient};
use peril::game::{FixedTieBreaker, GameHandle, GameState, TieBreak};
use peril::pubsub::memory::{MemoryChannel, PublishedMessage};
use peril::pubsub::{Broker, MemoryBroker, MessageHandler, Publisher, Subscriber, Topology, Verdict};
use peril::routing::RoutingTable;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT_LIMIT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// An in-memory broker with the peril exchanges declared
pub struct TestWorld {
    pub broker: MemoryBroker,
    pub routing: RoutingTable,
    pub subscriber: Subscriber<MemoryBroker>,
    pub publisher: Publisher<MemoryChannel>,
}

impl TestWorld {
    pub async fn new() -> Self {
        let broker = MemoryBroker::new();
        let routing = RoutingTable::default();
        let topology = Topology::new(&routing.dead_letter_exchange);
        let channel = broker.open_channel().await.expect("open channel");
        routing
            .declare_exchanges(&topology, &channel)
            .await
            .expect("declare exchanges");

        Self {
            subscriber: Subscriber::new(Arc::new(broker.clone()), topology),
            publisher: Publisher::new(channel),
            broker,
            routing,
        }
    }

    /// Start a player whose wars always break ties with `tie`, and subscribe it
    pub async fn join(&self, username: &str, tie: TieBreak) -> TestPlayer {
        let game = offline_player(username, tie);
        let session = join_game(
            &self.subscriber,
            self.publisher.clone(),
            &self.routing,
            game.clone(),
        )
        .await
        .expect("join game");
        let client = GameClient::new(game.clone(), self.publisher.clone(), self.routing.clone());

        TestPlayer {
            game,
            client,
            session,
        }
    }

    /// Messages published under routing keys starting with `prefix`
    pub fn published_with_prefix(&self, prefix: &str) -> Vec<PublishedMessage> {
        self.broker
            .published()
            .into_iter()
            .filter(|m| m.routing_key.starts_with(prefix))
            .collect()
    }
}

pub struct TestPlayer {
    pub game: GameHandle,
    pub client: GameClient<MemoryChannel>,
    pub session: ClientSession,
}

/// A player state owner that is not subscribed to anything
pub fn offline_player(username: &str, tie: TieBreak) -> GameHandle {
    let state = GameState::with_tie_breaker(username, Box::new(FixedTieBreaker(tie)));
    GameHandle::start(state).0
}

/// Poll `condition` until it holds; panics after two seconds
pub async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    eventually(description, || std::future::ready(condition())).await
}

/// Poll an async `condition` until it holds; panics after two seconds
pub async fn eventually<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", description);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Records every message it sees and answers with scripted verdicts
pub struct RecordingHandler<T> {
    seen: Arc<Mutex<Vec<T>>>,
    script: Arc<Mutex<Vec<Verdict>>>,
    fallback: Verdict,
}

impl<T: Clone + Send + 'static> RecordingHandler<T> {
    /// Answers `fallback` once `script` runs out
    pub fn new(script: Vec<Verdict>, fallback: Verdict) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(script)),
            fallback,
        }
    }

    pub fn acking() -> Self {
        Self::new(Vec::new(), Verdict::Ack)
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<T>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> MessageHandler<T> for RecordingHandler<T> {
    async fn handle(&self, message: T) -> Verdict {
        self.seen.lock().unwrap().push(message);
        self.script.lock().unwrap().pop().unwrap_or(self.fallback)
    }
}

pub fn seen_count<T>(seen: &Arc<Mutex<Vec<T>>>) -> usize {
    seen.lock().unwrap().len()
}
