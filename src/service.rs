//! Service wiring: two render subsystems behind one facade
//!
//! PDF and screenshot are two instances of the same generic subsystem, each
//! with its own store, snapshot file, scheduler, and browser pool; they only
//! share the config snapshot. Construction recovers persisted state and
//! nudges the scheduler so jobs orphaned by a crash resume.

use crate::artifact::{self, ArtifactHandle};
use crate::backend::RenderBackend;
use crate::browser::{ChromeBackend, PdfCapture, ShotCapture};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::job::{Job, JobKind, JobView, QueueStats};
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use crate::submit::{self, SubmitGuards, SubmitRequest};
use log::info;
use std::sync::Arc;

struct RenderSubsystem {
    store: Arc<JobStore>,
    scheduler: Scheduler,
    backend: Arc<dyn RenderBackend>,
    flusher: tokio::task::JoinHandle<()>,
}

impl RenderSubsystem {
    fn start(kind: JobKind, config: &Arc<ServiceConfig>, backend: Arc<dyn RenderBackend>) -> Self {
        let store = JobStore::new(config.snapshot_path(kind));
        let requeued = store.load();
        let flusher = store.spawn_flusher();
        let scheduler = Scheduler::start(
            kind,
            Arc::clone(&store),
            Arc::clone(&backend),
            Arc::clone(config),
        );
        if requeued > 0 {
            info!(
                "[{}] resuming {} job(s) interrupted by the last shutdown",
                kind.as_str(),
                requeued
            );
        }
        // Pick up any queued work recovered from the snapshot
        scheduler.trigger();

        Self {
            store,
            scheduler,
            backend,
            flusher,
        }
    }

    async fn shutdown(&self) {
        self.store.close_and_flush();
        let backend = Arc::clone(&self.backend);
        let _ = tokio::task::spawn_blocking(move || backend.shutdown()).await;
        self.flusher.abort();
    }
}

/// The render service core: submission, scheduling, rendering, download
pub struct RenderService {
    config: Arc<ServiceConfig>,
    pdf: RenderSubsystem,
    screenshot: RenderSubsystem,
    guards: SubmitGuards,
}

impl RenderService {
    /// Start the service with the Chrome-backed renderers and default
    /// guards. Must be called inside a tokio runtime.
    pub fn start(config: ServiceConfig) -> Arc<Self> {
        let config = config.normalized();
        let pdf_backend: Arc<dyn RenderBackend> = Arc::new(ChromeBackend::new(
            config.browser.clone(),
            PdfCapture::new(config.pdf.clone()),
        ));
        let screenshot_backend: Arc<dyn RenderBackend> =
            Arc::new(ChromeBackend::new(config.browser.clone(), ShotCapture));
        Self::with_backends(config, pdf_backend, screenshot_backend, SubmitGuards::default())
    }

    /// Start with explicit backends and guards. This is the seam tests use
    /// to run the full scheduling pipeline without a browser installed.
    pub fn with_backends(
        config: ServiceConfig,
        pdf_backend: Arc<dyn RenderBackend>,
        screenshot_backend: Arc<dyn RenderBackend>,
        guards: SubmitGuards,
    ) -> Arc<Self> {
        let config = Arc::new(config.normalized());
        let pdf = RenderSubsystem::start(JobKind::Pdf, &config, pdf_backend);
        let screenshot = RenderSubsystem::start(JobKind::Screenshot, &config, screenshot_backend);
        Arc::new(Self {
            config,
            pdf,
            screenshot,
            guards,
        })
    }

    fn subsystem(&self, kind: JobKind) -> &RenderSubsystem {
        match kind {
            JobKind::Pdf => &self.pdf,
            JobKind::Screenshot => &self.screenshot,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Submit a PDF rendering job
    pub fn submit_pdf(&self, request: SubmitRequest) -> Result<Job> {
        self.submit(JobKind::Pdf, request)
    }

    /// Submit a screenshot rendering job
    pub fn submit_screenshot(&self, request: SubmitRequest) -> Result<Job> {
        self.submit(JobKind::Screenshot, request)
    }

    pub fn submit(&self, kind: JobKind, request: SubmitRequest) -> Result<Job> {
        let sub = self.subsystem(kind);
        submit::submit(
            kind,
            request,
            &self.guards,
            &sub.store,
            &sub.scheduler,
            self.config.queue.max_size,
        )
    }

    /// Current status projection for a job, if known
    pub fn get_status(&self, kind: JobKind, key: &str) -> Option<JobView> {
        self.subsystem(kind).store.get(key).map(|j| JobView::from(&j))
    }

    /// Cancel a job; see the scheduler for the cooperative semantics
    pub fn cancel(&self, kind: JobKind, key: &str) -> bool {
        self.subsystem(kind).scheduler.cancel(key)
    }

    /// Remove a job entry and its artifact; refused while processing
    pub fn remove(&self, kind: JobKind, key: &str) -> bool {
        self.subsystem(kind).scheduler.remove(key)
    }

    pub fn queue_stats(&self, kind: JobKind) -> QueueStats {
        self.subsystem(kind).store.stats()
    }

    /// Open a completed job's artifact for streaming download
    pub async fn open_artifact(&self, kind: JobKind, key: &str) -> Result<ArtifactHandle> {
        artifact::open_artifact(&self.subsystem(kind).store, key).await
    }

    /// Drop terminal jobs older than `age` from both stores. Artifact files
    /// are untouched; that housekeeping runs elsewhere.
    pub fn cleanup_older_than(&self, age: chrono::Duration) -> usize {
        self.pdf.store.cleanup_older_than(age) + self.screenshot.store.cleanup_older_than(age)
    }

    /// Flush both stores and tear the browser pools down. Active workers
    /// observe context-closed errors on their next browser call and finish
    /// as failed attempts.
    pub async fn shutdown(&self) {
        info!("Render service shutting down");
        self.pdf.shutdown().await;
        self.screenshot.shutdown().await;
    }
}
