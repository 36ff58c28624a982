//! Render worker: drives one job through the render state machine
//!
//! Invoked once per dispatched job, after the scheduler has already claimed
//! it (QUEUED -> PROCESSING). Each attempt runs the backend on a blocking
//! thread, raced against the per-attempt deadline; on deadline the attempt's
//! interrupt hook is fired to force-close the in-flight browser work. Only
//! the final failed attempt moves the job to FAILED; earlier failures are
//! logged and retried after the configured delay.

use crate::backend::{AttemptContext, InterruptHandle};
use crate::job::{JobKind, JobStatus};
use crate::naming;
use crate::scheduler::Scheduler;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

enum AttemptOutcome {
    Completed(PathBuf),
    Cancelled,
    Failed(String),
}

pub(crate) struct Worker;

impl Worker {
    /// Run the retry loop for one claimed job on its own task.
    pub(crate) fn spawn(scheduler: Scheduler, key: String) {
        tokio::spawn(async move {
            Self::run(scheduler, key).await;
        });
    }

    async fn run(scheduler: Scheduler, key: String) {
        let store = scheduler.store().clone();
        let queue_cfg = &scheduler.config().queue;
        let total_attempts = queue_cfg.retry_attempts + 1;
        let retry_delay = Duration::from_millis(queue_cfg.retry_delay_ms);
        let kind = scheduler.kind();

        for attempt in 1..=total_attempts {
            let is_final = attempt == total_attempts;
            match Self::run_attempt(&scheduler, &key, is_final).await {
                AttemptOutcome::Completed(path) => {
                    store.update(&key, |j| {
                        j.status = JobStatus::Completed;
                        j.progress = 100;
                        j.file_path = Some(path.to_string_lossy().into_owned());
                        j.error = None;
                    });
                    info!(
                        "[{}] job '{}' completed: {}",
                        kind.as_str(),
                        key,
                        path.display()
                    );
                    break;
                }
                AttemptOutcome::Cancelled => {
                    info!("[{}] job '{}' aborted after cancellation", kind.as_str(), key);
                    break;
                }
                AttemptOutcome::Failed(message) if is_final => {
                    warn!(
                        "[{}] job '{}' failed after {} attempt(s): {}",
                        kind.as_str(),
                        key,
                        total_attempts,
                        message
                    );
                    store.update(&key, |j| {
                        if j.status == JobStatus::Processing {
                            j.status = JobStatus::Failed;
                            j.error = Some(message.clone());
                        }
                    });
                }
                AttemptOutcome::Failed(message) => {
                    warn!(
                        "[{}] job '{}' attempt {}/{} failed, retrying in {}ms: {}",
                        kind.as_str(),
                        key,
                        attempt,
                        total_attempts,
                        queue_cfg.retry_delay_ms,
                        message
                    );
                    tokio::time::sleep(retry_delay).await;
                    if store.status_of(&key) == Some(JobStatus::Cancelled) {
                        info!("[{}] job '{}' cancelled between attempts", kind.as_str(), key);
                        break;
                    }
                }
            }
        }

        scheduler.trigger();
    }

    async fn run_attempt(scheduler: &Scheduler, key: &str, is_final: bool) -> AttemptOutcome {
        let store = scheduler.store().clone();
        let Some(job) = store.get(key) else {
            return AttemptOutcome::Failed(format!("Job '{}' disappeared from the store", key));
        };

        let interrupt = InterruptHandle::default();
        let cancelled_probe = {
            let store = store.clone();
            let key = key.to_string();
            Arc::new(move || store.status_of(&key) == Some(JobStatus::Cancelled))
                as Arc<dyn Fn() -> bool + Send + Sync>
        };
        let progress_sink = {
            let store = store.clone();
            let key = key.to_string();
            Arc::new(move |pct: u8| {
                store.update(&key, |j| {
                    if j.status == JobStatus::Processing {
                        j.progress = pct;
                    }
                });
            }) as Arc<dyn Fn(u8) + Send + Sync>
        };
        let ctx = AttemptContext::new(cancelled_probe, progress_sink, interrupt.clone(), is_final);

        let backend = scheduler.backend().clone();
        let extension = backend.extension(&job.options);
        let job_for_attempt = job.clone();
        let mut handle =
            tokio::task::spawn_blocking(move || backend.render(&job_for_attempt, &ctx));

        let timeout_ms = scheduler.config().queue.processing_timeout_ms;
        let joined = match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut handle).await
        {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    "Job '{}' attempt exceeded {}ms; interrupting browser work",
                    key, timeout_ms
                );
                let fire = interrupt.clone();
                let _ = tokio::task::spawn_blocking(move || fire.fire()).await;
                // Let the unblocked attempt wind down before reporting
                let _ = (&mut handle).await;
                return AttemptOutcome::Failed(crate::Error::TimedOut(timeout_ms).to_string());
            }
        };

        match joined {
            Ok(Ok(bytes)) => {
                match Self::write_artifact(scheduler, key, extension, &bytes).await {
                    Ok(path) => AttemptOutcome::Completed(path),
                    Err(message) => AttemptOutcome::Failed(message),
                }
            }
            Ok(Err(att)) if att.cancelled => AttemptOutcome::Cancelled,
            Ok(Err(att)) => {
                let mut message = att.message;
                if is_final && job.kind == JobKind::Pdf {
                    if let Some(png) = att.diagnostic_png {
                        if let Some(path) = Self::write_diagnostic(scheduler, key, &png).await {
                            message = format!("{} (screenshot: {})", message, path.display());
                        }
                    }
                }
                AttemptOutcome::Failed(message)
            }
            Err(join_err) => AttemptOutcome::Failed(format!("Render attempt panicked: {}", join_err)),
        }
    }

    /// Create the date directory on demand and write the artifact. The file
    /// is on disk before the job is marked complete.
    async fn write_artifact(
        scheduler: &Scheduler,
        key: &str,
        extension: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, String> {
        let now = chrono::Local::now();
        let dir = scheduler
            .config()
            .storage
            .output_dir
            .join(naming::date_folder(now));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| format!("Failed to create output dir {}: {}", dir.display(), e))?;

        let path = dir.join(naming::artifact_filename(key, extension, now));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| format!("Failed to write artifact {}: {}", path.display(), e))?;
        debug!("Wrote {} byte(s) to {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Best-effort diagnostic screenshot next to where the artifact would
    /// have gone. Failures are logged and ignored.
    async fn write_diagnostic(scheduler: &Scheduler, key: &str, png: &[u8]) -> Option<PathBuf> {
        let now = chrono::Local::now();
        let dir = scheduler
            .config()
            .storage
            .output_dir
            .join(naming::date_folder(now));
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Failed to create dir for diagnostic screenshot: {}", e);
            return None;
        }
        let path = dir.join(naming::error_screenshot_filename(key, now));
        match tokio::fs::write(&path, png).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Failed to write diagnostic screenshot {}: {}", path.display(), e);
                None
            }
        }
    }
}
