//! Priority scheduler: picks the next runnable job and owns the process signal
//!
//! There is no separate queue structure; the store is scanned. `trigger()`
//! coalesces through a capacity-1 channel, so any number of nudges while a
//! selection pass is pending collapse into one wakeup. A pass claims at most
//! one job; workers re-trigger on completion and the pass re-triggers itself
//! while capacity and runnable work remain, so bursts drain without relying
//! on submission timing.

use crate::backend::RenderBackend;
use crate::config::ServiceConfig;
use crate::job::JobKind;
use crate::store::{JobStore, RemoveOutcome};
use crate::worker::Worker;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

struct SchedulerInner {
    kind: JobKind,
    store: Arc<JobStore>,
    backend: Arc<dyn RenderBackend>,
    config: Arc<ServiceConfig>,
    tx: mpsc::Sender<()>,
}

/// Cheap cloneable handle over one kind's scheduling loop
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Spawn the scheduling loop for one kind. Must run inside a tokio
    /// runtime.
    pub fn start(
        kind: JobKind,
        store: Arc<JobStore>,
        backend: Arc<dyn RenderBackend>,
        config: Arc<ServiceConfig>,
    ) -> Scheduler {
        let (tx, mut rx) = mpsc::channel(1);
        let scheduler = Scheduler {
            inner: Arc::new(SchedulerInner {
                kind,
                store,
                backend,
                config,
                tx,
            }),
        };

        let loop_handle = scheduler.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                loop_handle.pass();
            }
            debug!("[{}] scheduler loop stopped", loop_handle.inner.kind.as_str());
        });

        scheduler
    }

    /// Request a selection pass. No-op when one is already pending.
    pub fn trigger(&self) {
        let _ = self.inner.tx.try_send(());
    }

    /// One selection pass: enforce the concurrency ceiling, claim the best
    /// queued job, hand it to a worker.
    fn pass(&self) {
        let inner = &self.inner;
        let max = inner.config.browser.max_concurrent;

        if inner.store.processing_count() >= max {
            return;
        }
        let Some(job) = inner.store.next_queued() else {
            return;
        };
        if !inner.store.mark_processing(&job.key) {
            // Lost a race with cancel/remove between selection and claim
            self.trigger();
            return;
        }

        debug!(
            "[{}] dispatching job '{}' (priority {})",
            inner.kind.as_str(),
            job.key,
            job.priority
        );
        Worker::spawn(self.clone(), job.key.clone());

        if inner.store.processing_count() < max && inner.store.has_queued() {
            self.trigger();
        }
    }

    /// Cancel a job. Queued jobs become unselectable immediately; a running
    /// worker observes the change cooperatively at its next checkpoint. The
    /// store entry remains until removed or cleaned up.
    pub fn cancel(&self, key: &str) -> bool {
        let cancelled = self.inner.store.cancel(key);
        if cancelled {
            info!("[{}] job '{}' cancelled", self.inner.kind.as_str(), key);
        }
        cancelled
    }

    /// Delete a job entry and its artifact file. Refused for jobs that are
    /// actively processing; the check and the delete happen under one store
    /// lock so a concurrent selection pass cannot claim the job in between.
    /// File delete errors are logged; the entry removal still succeeds.
    pub fn remove(&self, key: &str) -> bool {
        let job = match self.inner.store.remove_unless_processing(key) {
            RemoveOutcome::Removed(job) => job,
            RemoveOutcome::Refused => {
                warn!(
                    "[{}] refusing to remove job '{}' while it is processing",
                    self.inner.kind.as_str(),
                    key
                );
                return false;
            }
            RemoveOutcome::Missing => return false,
        };

        if let Some(path) = &job.file_path {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed artifact {}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove artifact {}: {}", path, e),
            }
        }
        true
    }

    pub(crate) fn kind(&self) -> JobKind {
        self.inner.kind
    }

    pub(crate) fn store(&self) -> &Arc<JobStore> {
        &self.inner.store
    }

    pub(crate) fn backend(&self) -> &Arc<dyn RenderBackend> {
        &self.inner.backend
    }

    pub(crate) fn config(&self) -> &Arc<ServiceConfig> {
        &self.inner.config
    }
}
