//! Error types for the render service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the render service core
#[derive(Error, Debug)]
pub enum Error {
    /// A key or option failed validation before admission
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The URL validator or HTML sanitizer rejected the source
    #[error("Unsafe source rejected: {0}")]
    UnsafeSource(String),

    /// A non-terminal job with the same key already exists
    #[error("A job with key '{0}' already exists")]
    DuplicateKey(String),

    /// The store is at its configured capacity
    #[error("Queue is full ({0} entries)")]
    QueueFull(usize),

    /// The requested key is unknown
    #[error("No job found for key '{0}'")]
    NotFound(String),

    /// The artifact was requested before the job completed
    #[error("Job '{key}' is not ready (status: {status})")]
    NotReady { key: String, status: String },

    /// The job completed but its file is gone
    #[error("Artifact for job '{0}' is missing on disk")]
    ArtifactMissing(String),

    /// Terminal worker failure after all retries
    #[error("Rendering failed: {0}")]
    RenderFailed(String),

    /// The job was cancelled cooperatively
    #[error("Job '{0}' was cancelled")]
    Cancelled(String),

    /// A single attempt exceeded the processing timeout
    #[error("Rendering timed out after {0}ms")]
    TimedOut(u64),

    /// Browser launch or protocol failure
    #[error("Browser error: {0}")]
    Browser(String),

    /// Filesystem or persistence failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Browser(err.to_string())
    }
}
