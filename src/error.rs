//! Error types for the peril game
//!
//! Each variant corresponds to a failure class with its own handling rule:
//! setup failures abort a subscription, transport failures go back to the
//! publisher's caller, decode failures never leave the dispatcher, and
//! validation failures only ever reach the player who issued the command.

/// Result type alias for convenience
pub type Result<T, E = PerilError> = std::result::Result<T, E>;

/// Errors raised by the pub/sub layer and the game state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PerilError {
    /// Declaring, binding, QoS or consumer registration failed
    #[error("Broker setup failed: {message}")]
    Setup { message: String },

    /// Connecting or publishing failed
    #[error("Broker transport failed: {message}")]
    Transport { message: String },

    #[error("Failed to encode message: {message}")]
    Encode { message: String },

    #[error("Failed to decode message: {message}")]
    Decode { message: String },

    /// A player command was rejected before anything was published
    #[error("{reason}")]
    Validation { reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The game state owner task is gone
    #[error("Game state unavailable: {message}")]
    StateUnavailable { message: String },
}

impl PerilError {
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}
