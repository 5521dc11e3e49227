//! Metrics collection using Prometheus
//!
//! Counters for delivery settlement, decode failures and publishes, all
//! registered on a private registry.

use crate::pubsub::Verdict;
use anyhow::Result;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Main metrics collector for peril processes
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Deliveries settled, by queue and verdict
    deliveries_total: IntCounterVec,

    /// Deliveries discarded before reaching a handler
    decode_failures_total: IntCounterVec,

    /// Publish attempts, by exchange and outcome
    publishes_total: IntCounterVec,

    /// Active subscriptions
    pub subscriptions: IntGauge,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let deliveries_total = IntCounterVec::new(
            Opts::new("peril_deliveries_total", "Deliveries settled with the broker"),
            &["queue", "verdict"],
        )?;
        let decode_failures_total = IntCounterVec::new(
            Opts::new(
                "peril_decode_failures_total",
                "Deliveries discarded because their body could not be decoded",
            ),
            &["queue"],
        )?;
        let publishes_total = IntCounterVec::new(
            Opts::new("peril_publishes_total", "Publish attempts"),
            &["exchange", "outcome"],
        )?;
        let subscriptions = IntGauge::new("peril_subscriptions", "Active subscriptions")?;

        registry.register(Box::new(deliveries_total.clone()))?;
        registry.register(Box::new(decode_failures_total.clone()))?;
        registry.register(Box::new(publishes_total.clone()))?;
        registry.register(Box::new(subscriptions.clone()))?;

        Ok(Self {
            registry,
            deliveries_total,
            decode_failures_total,
            publishes_total,
            subscriptions,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn record_delivery(&self, queue: &str, verdict: Verdict) {
        self.deliveries_total
            .with_label_values(&[queue, verdict.as_str()])
            .inc();
    }

    pub fn record_decode_failure(&self, queue: &str) {
        self.decode_failures_total.with_label_values(&[queue]).inc();
    }

    pub fn record_publish(&self, exchange: &str, succeeded: bool) {
        let outcome = if succeeded { "ok" } else { "error" };
        self.publishes_total
            .with_label_values(&[exchange, outcome])
            .inc();
    }

    pub fn delivery_count(&self, queue: &str, verdict: Verdict) -> u64 {
        self.deliveries_total
            .with_label_values(&[queue, verdict.as_str()])
            .get()
    }

    pub fn decode_failure_count(&self, queue: &str) -> u64 {
        self.decode_failures_total.with_label_values(&[queue]).get()
    }

    pub fn publish_count(&self, exchange: &str, succeeded: bool) -> u64 {
        let outcome = if succeeded { "ok" } else { "error" };
        self.publishes_total
            .with_label_values(&[exchange, outcome])
            .get()
    }

    /// Render every metric in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        TextEncoder::new()
            .encode_to_string(&metric_families)
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_labelled() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_delivery("war", Verdict::NackRequeue);
        collector.record_delivery("war", Verdict::NackRequeue);
        collector.record_delivery("war", Verdict::Ack);

        assert_eq!(collector.delivery_count("war", Verdict::NackRequeue), 2);
        assert_eq!(collector.delivery_count("war", Verdict::Ack), 1);
        assert_eq!(collector.delivery_count("game_logs", Verdict::Ack), 0);
    }

    #[test]
    fn test_text_encoding_includes_counters() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_publish("peril_topic", true);
        collector.record_decode_failure("army_moves.alice");

        let text = collector.encode_text().unwrap();
        assert!(text.contains("peril_publishes_total"));
        assert!(text.contains("peril_decode_failures_total"));
    }
}
