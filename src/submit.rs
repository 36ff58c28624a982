//! Submission facade: validate, vet, de-duplicate, enqueue
//!
//! The HTML sanitizer and URL validator are external collaborators; the
//! facade only knows their seams. The defaults here are deliberately thin:
//! a pass-through sanitizer and a scheme/host check for URLs. Deployments
//! plug real implementations through `SubmitGuards`.

use crate::error::{Error, Result};
use crate::job::{Job, JobKind, SourceKind};
use crate::options::RenderOptions;
use crate::scheduler::Scheduler;
use crate::store::{AdmitOutcome, JobStore};
use log::debug;
use std::sync::Arc;

/// Seam for the external HTML sanitizer
pub trait HtmlSanitizer: Send + Sync {
    fn sanitize(&self, html: &str) -> Result<String>;
}

/// Seam for the external URL-safety validator
pub trait UrlValidator: Send + Sync {
    fn validate(&self, url: &str) -> Result<()>;
}

/// Default sanitizer: accepts the document unchanged
pub struct PassthroughSanitizer;

impl HtmlSanitizer for PassthroughSanitizer {
    fn sanitize(&self, html: &str) -> Result<String> {
        Ok(html.to_string())
    }
}

/// Default validator: http/https with a host, nothing else
pub struct HttpUrlValidator;

impl UrlValidator for HttpUrlValidator {
    fn validate(&self, url: &str) -> Result<()> {
        let parsed =
            url::Url::parse(url).map_err(|e| Error::UnsafeSource(format!("Invalid URL: {}", e)))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::UnsafeSource(format!(
                    "URL scheme '{}' is not allowed",
                    other
                )))
            }
        }
        if parsed.host_str().is_none() {
            return Err(Error::UnsafeSource("URL has no host".into()));
        }
        Ok(())
    }
}

/// The guard pair consulted before admission
pub struct SubmitGuards {
    pub sanitizer: Arc<dyn HtmlSanitizer>,
    pub url_validator: Arc<dyn UrlValidator>,
}

impl Default for SubmitGuards {
    fn default() -> Self {
        Self {
            sanitizer: Arc::new(PassthroughSanitizer),
            url_validator: Arc::new(HttpUrlValidator),
        }
    }
}

/// One rendering request as handed to the facade
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub key: String,
    pub source_kind: SourceKind,
    pub source: String,
    pub options: RenderOptions,
    /// Remove any prior job (and its artifact) before enqueueing
    pub re_create: bool,
}

impl SubmitRequest {
    pub fn new(key: impl Into<String>, source_kind: SourceKind, source: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source_kind,
            source: source.into(),
            options: RenderOptions::default(),
            re_create: false,
        }
    }
}

/// Requested keys are 1..=255 ASCII letters, digits, `-` or `_`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 255 {
        return Err(Error::InvalidInput(format!(
            "Key must be 1..=255 characters, got {}",
            key.len()
        )));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(Error::InvalidInput(format!(
            "Key '{}' contains characters outside [A-Za-z0-9_-]",
            key
        )));
    }
    Ok(())
}

/// Run the full admission sequence for one kind and nudge the scheduler on
/// success. Returns the live job record, which for an idempotent hit is the
/// existing completed one.
pub(crate) fn submit(
    kind: JobKind,
    mut request: SubmitRequest,
    guards: &SubmitGuards,
    store: &Arc<JobStore>,
    scheduler: &Scheduler,
    max_queue_size: usize,
) -> Result<Job> {
    validate_key(&request.key)?;
    request.options.validate(kind)?;

    if request.source_kind.is_html() {
        request.source = guards.sanitizer.sanitize(&request.source)?;
    } else {
        guards.url_validator.validate(&request.source)?;
    }

    if request.re_create {
        // Drops the prior entry and artifact; refused (and therefore a
        // duplicate below) while the old job is still processing
        scheduler.remove(&request.key);
    }

    let key = request.key.clone();
    let job = Job::new(
        request.key,
        kind,
        request.source_kind,
        request.source,
        request.options,
    );

    match store.admit(job, max_queue_size) {
        AdmitOutcome::Inserted(job) => {
            debug!("[{}] job '{}' queued", kind.as_str(), job.key);
            scheduler.trigger();
            Ok(job)
        }
        AdmitOutcome::ExistingCompleted(job) => {
            debug!("[{}] idempotent hit for '{}'", kind.as_str(), job.key);
            Ok(job)
        }
        AdmitOutcome::Duplicate => Err(Error::DuplicateKey(key)),
        AdmitOutcome::Full(len) => Err(Error::QueueFull(len)),
    }
}
