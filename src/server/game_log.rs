//! Durable sink for the game logs players publish

use crate::pubsub::{MessageHandler, Verdict};
use crate::types::GameLog;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Appends one line per log entry
pub struct GameLogWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl GameLogWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_line(log: &GameLog) -> String {
        format!(
            "{} {}: {}\n",
            log.current_time.format("%Y-%m-%d %H:%M:%S%.3f"),
            log.username,
            log.message
        )
    }

    pub async fn append(&self, log: &GameLog) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(Self::format_line(log).as_bytes()).await?;
        file.flush().await
    }
}

/// Writes received logs to disk; logs that cannot be written are dead-lettered
pub struct GameLogHandler {
    writer: GameLogWriter,
}

impl GameLogHandler {
    pub fn new(writer: GameLogWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl MessageHandler<GameLog> for GameLogHandler {
    async fn handle(&self, log: GameLog) -> Verdict {
        info!("Game log from {}: {}", log.username, log.message);
        match self.writer.append(&log).await {
            Ok(()) => Verdict::Ack,
            Err(e) => {
                error!(
                    "Failed to write game log to {}: {}",
                    self.writer.path().display(),
                    e
                );
                Verdict::NackDiscard
            }
        }
    }
}
