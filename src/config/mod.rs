//! Configuration management for peril
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values for the server and client.

pub mod app;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, ServiceSettings};
