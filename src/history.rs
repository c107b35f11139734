//! Conversation history store
//!
//! Finished conversations are persisted as opaque records. The core never
//! reads them back; listing and clearing exist for the control surface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::LiveResult;
use crate::live::TranscriptTurn;

/// One saved conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<TranscriptTurn>,
}

impl HistoryRecord {
    /// Build a record titled after the first user utterance
    pub fn from_turns(id: impl Into<String>, turns: Vec<TranscriptTurn>) -> Self {
        let title = turns
            .iter()
            .find(|turn| turn.speaker == crate::live::Speaker::User)
            .or_else(|| turns.first())
            .map(|turn| title_from(&turn.text))
            .unwrap_or_else(|| "Voice conversation".to_string());

        Self {
            id: id.into(),
            title,
            created_at: Utc::now(),
            turns,
        }
    }
}

fn title_from(text: &str) -> String {
    const MAX_TITLE_CHARS: usize = 60;

    let mut title: String = text.chars().take(MAX_TITLE_CHARS).collect();
    if text.chars().count() > MAX_TITLE_CHARS {
        title.push_str("...");
    }
    title
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: HistoryRecord) -> LiveResult<()>;

    /// Newest first
    async fn list(&self) -> LiveResult<Vec<HistoryRecord>>;

    async fn clear(&self) -> LiveResult<()>;
}

/// History kept in memory only
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, record: HistoryRecord) -> LiveResult<()> {
        self.records.lock().await.insert(0, record);
        Ok(())
    }

    async fn list(&self) -> LiveResult<Vec<HistoryRecord>> {
        Ok(self.records.lock().await.clone())
    }

    async fn clear(&self) -> LiveResult<()> {
        self.records.lock().await.clear();
        Ok(())
    }
}

/// History persisted as one JSON array on disk
pub struct JsonFileHistory {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl JsonFileHistory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> LiveResult<Vec<HistoryRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, records: &[HistoryRecord]) -> LiveResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Wrote {} history records to {}", records.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistory {
    async fn append(&self, record: HistoryRecord) -> LiveResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        info!("Saving conversation {} to history", record.id);
        records.insert(0, record);
        self.write_all(&records).await
    }

    async fn list(&self) -> LiveResult<Vec<HistoryRecord>> {
        let _guard = self.lock.lock().await;
        self.read_all().await
    }

    async fn clear(&self) -> LiveResult<()> {
        let _guard = self.lock.lock().await;
        info!("Clearing history at {}", self.path.display());
        self.write_all(&[]).await
    }
}
