//! Peril - a turn-based strategy game coordinated through an AMQP broker
//!
//! This crate provides typed publish/subscribe with explicit acknowledgement
//! semantics, the per-player game state machine that decides those
//! acknowledgements, and the client and server built on top of them.

pub mod client;
pub mod config;
pub mod error;
pub mod game;
pub mod metrics;
pub mod pubsub;
pub mod routing;
pub mod server;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{PerilError, Result};
pub use types::*;

// Re-export key components
pub use game::{GameHandle, GameState};
pub use pubsub::{MessageHandler, Publisher, Subscriber, Verdict};
pub use routing::{MessageKind, RoutingTable};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
