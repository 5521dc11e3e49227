//! Fire-and-forget publishing of encoded payloads

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::pubsub::broker::BrokerChannel;
use crate::pubsub::codec::{Codec, JsonCodec, MsgPackCodec};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes payloads on one channel; no broker confirmation is awaited
#[derive(Clone)]
pub struct Publisher<C: BrokerChannel> {
    channel: C,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<C: BrokerChannel> Publisher<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Encode `value` with `codec` and publish it to `exchange`
    pub async fn publish<K, T>(
        &self,
        codec: &K,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<()>
    where
        K: Codec,
        T: Serialize + Sync,
    {
        let body = codec.encode(value)?;
        let size = body.len();

        let result = self
            .channel
            .publish(exchange, routing_key, codec.encoding().content_type(), body)
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(exchange, result.is_ok());
        }

        match &result {
            Ok(()) => debug!(
                "Published {} bytes to '{}' with key '{}'",
                size, exchange, routing_key
            ),
            Err(e) => warn!(
                "Publish to '{}' with key '{}' failed: {}",
                exchange, routing_key, e
            ),
        }
        result
    }

    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<()> {
        self.publish(&JsonCodec, exchange, routing_key, value).await
    }

    pub async fn publish_binary<T: Serialize + Sync>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<()> {
        self.publish(&MsgPackCodec, exchange, routing_key, value).await
    }
}
