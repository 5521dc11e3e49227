//! Utility functions shared by the client and server

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a unique consumer tag for a queue
pub fn consumer_tag(queue_name: &str) -> String {
    format!("peril-{}-{}", queue_name, Uuid::new_v4())
}

/// Split a REPL line into words, dropping blanks
pub fn split_words(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
