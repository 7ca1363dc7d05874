//! JSON-lines sinks for terminal artifacts
//!
//! Each terminal target becomes one line, appended under a lock so
//! concurrent tiers never interleave partial records.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use coordination::{AttemptSummary, ExtractedResult, ResultSink, ReviewSink, SinkError};

/// One line of the results file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub target_id: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: ExtractedResult,
}

/// One line of the manual-review file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub target_id: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
    pub summary: AttemptSummary,
}

/// Append-only JSONL file shared by both sinks
struct JsonlFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFile {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn append<T: Serialize>(&self, record: &T) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| SinkError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub struct JsonlResultSink {
    file: JsonlFile,
}

impl JsonlResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonlFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

#[async_trait]
impl ResultSink for JsonlResultSink {
    async fn persist(&self, target_id: &str, result: &ExtractedResult) -> Result<(), SinkError> {
        if result.schedule.grades.is_empty() {
            return Err(SinkError::Rejected(format!(
                "{target_id}: schedule has no grade bands"
            )));
        }
        self.file
            .append(&ResultRecord {
                target_id: target_id.to_string(),
                recorded_at: Utc::now(),
                result: result.clone(),
            })
            .await?;
        debug!(target_id, path = %self.file.path.display(), "Result written");
        Ok(())
    }
}

pub struct JsonlReviewSink {
    file: JsonlFile,
}

impl JsonlReviewSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonlFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

#[async_trait]
impl ReviewSink for JsonlReviewSink {
    async fn flag(
        &self,
        target_id: &str,
        reason: &str,
        summary: &AttemptSummary,
    ) -> Result<(), SinkError> {
        self.file
            .append(&ReviewRecord {
                target_id: target_id.to_string(),
                reason: reason.to_string(),
                recorded_at: Utc::now(),
                summary: summary.clone(),
            })
            .await?;
        debug!(target_id, reason, "Flagged for review");
        Ok(())
    }
}
