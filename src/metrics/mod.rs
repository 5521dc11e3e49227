//! Metrics and monitoring
//!
//! Prometheus counters recorded by the dispatcher and publisher, plus the HTTP
//! endpoints the server exposes them on.

pub mod collector;
pub mod health;

pub use collector::MetricsCollector;
pub use health::{HealthServer, HealthServerConfig};
