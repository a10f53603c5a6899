//! Conversation persistence sink
//!
//! Every user and assistant turn is handed to a [`ConversationSink`]. The
//! session never waits on it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::gateway::ProviderKind;

/// Pending records buffered for the writer task
const LOG_CHANNEL_CAPACITY: usize = 64;

/// One persisted turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub conversation_id: String,
    pub content: String,
    pub is_from_user: bool,
    pub timestamp: DateTime<Utc>,
    pub provider: ProviderKind,
}

/// Fire-and-forget turn persistence
pub trait ConversationSink: Send + Sync {
    fn record(&self, record: TurnRecord);
}

/// Appends one JSON line per turn to a file from a background task
pub struct JsonlConversationLog {
    tx: mpsc::Sender<TurnRecord>,
}

impl JsonlConversationLog {
    /// Start the writer task for `path`
    pub fn spawn(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let path = path.into();
        let (tx, mut rx) = mpsc::channel::<TurnRecord>(LOG_CHANNEL_CAPACITY);

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = append(&path, &record).await {
                    error!(path = %path.display(), error = %e, "failed to persist turn");
                }
            }
            debug!("conversation log closed");
        });

        (Self { tx }, handle)
    }
}

impl ConversationSink for JsonlConversationLog {
    fn record(&self, record: TurnRecord) {
        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "conversation record dropped");
        }
    }
}

async fn append(path: &Path, record: &TurnRecord) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(&line).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.jsonl");
        let (log, handle) = JsonlConversationLog::spawn(&path);

        log.record(TurnRecord {
            conversation_id: "default".into(),
            content: "what's the weather".into(),
            is_from_user: true,
            timestamp: Utc::now(),
            provider: ProviderKind::OpenAi,
        });
        log.record(TurnRecord {
            conversation_id: "default".into(),
            content: "It's sunny.".into(),
            is_from_user: false,
            timestamp: Utc::now(),
            provider: ProviderKind::OpenAi,
        });
        drop(log);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let records: Vec<TurnRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_from_user);
        assert_eq!(records[1].content, "It's sunny.");
        assert!(contents.contains("\"isFromUser\":true"));
        assert!(contents.contains("\"provider\":\"openai\""));
    }
}
