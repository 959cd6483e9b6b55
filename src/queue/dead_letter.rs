//! Dead-letter sinks for jobs that exhausted their retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dead-letter encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("dead-letter sink unavailable: {0}")]
    Unavailable(String),
}

/// Message written to the dead-letter sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    /// The job as received; a JSON string when the body was not valid JSON.
    pub original_message: Value,
    pub failure_reason: String,
    pub operation_id: Option<String>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterMessage {
    pub fn new(original_message: Value, failure_reason: impl Into<String>) -> Self {
        let operation_id = original_message
            .get("operation_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        Self {
            original_message,
            failure_reason: failure_reason.into(),
            operation_id,
            failed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, message: DeadLetterMessage) -> Result<(), DeadLetterError>;
}

/// Appends one JSON document per line to a file.
#[derive(Debug)]
pub struct FileDeadLetterSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileDeadLetterSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for FileDeadLetterSink {
    async fn send(&self, message: DeadLetterMessage) -> Result<(), DeadLetterError> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        metrics::record_dead_letter();
        tracing::warn!(
            operation_id = message.operation_id.as_deref().unwrap_or("-"),
            reason = %message.failure_reason,
            "Job dead-lettered"
        );
        Ok(())
    }
}

/// Keeps dead letters in memory; for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    messages: Mutex<Vec<DeadLetterMessage>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<DeadLetterMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn send(&self, message: DeadLetterMessage) -> Result<(), DeadLetterError> {
        metrics::record_dead_letter();
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }
}
