//! Job records and status projections

use crate::options::RenderOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Pdf,
    Screenshot,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Pdf => "PDF",
            JobKind::Screenshot => "SCREENSHOT",
        }
    }
}

/// Where the source payload comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    InlineHtml,
    RemoteUrl,
    UploadedHtml,
}

impl SourceKind {
    /// Inline and uploaded HTML flow through the sanitizer; URLs through the
    /// URL validator.
    pub fn is_html(&self) -> bool {
        matches!(self, SourceKind::InlineHtml | SourceKind::UploadedHtml)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central job entity. Owned exclusively by the job store; schedulers
/// and workers hold only the key and operate through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub key: String,
    pub kind: JobKind,
    pub source_kind: SourceKind,
    pub source: String,
    pub options: RenderOptions,
    pub status: JobStatus,
    pub progress: u8,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl Job {
    pub fn new(
        key: String,
        kind: JobKind,
        source_kind: SourceKind,
        source: String,
        options: RenderOptions,
    ) -> Self {
        let now = Utc::now();
        let priority = options.effective_priority();
        Self {
            key,
            kind,
            source_kind,
            source,
            options,
            status: JobStatus::Queued,
            progress: 0,
            priority,
            created_at: now,
            updated_at: now,
            file_path: None,
            error: None,
        }
    }
}

/// Status projection handed to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub key: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            key: job.key.clone(),
            status: job.status,
            progress: job.progress,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            file_path: job.file_path.clone(),
            error: job.error.clone(),
        }
    }
}

/// Per-kind queue counters
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}
