//! Job store: the single source of truth for known jobs
//!
//! All mutations go through one mutex covering the job map and the dirty
//! flag, so every operation is linearizable with respect to the others.
//! Persistence is a debounced single flusher: each mutation nudges the
//! flusher, which waits for a short quiescence window, snapshots the map
//! under the lock, and writes the JSON outside it. A disk error never fails
//! the mutation that scheduled the flush; the next flush retries.

use crate::job::{Job, JobStatus, QueueStats};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Quiescence window before a scheduled flush runs
pub(crate) const FLUSH_DEBOUNCE_MS: u64 = 100;

/// Outcome of a guarded removal attempt
pub enum RemoveOutcome {
    /// The entry was deleted; the caller owns any artifact cleanup
    Removed(Job),
    /// The job is actively processing and was left in place
    Refused,
    /// No entry with this key exists
    Missing,
}

/// Outcome of a race-safe admission attempt
pub enum AdmitOutcome {
    /// The job was inserted and is now queued
    Inserted(Job),
    /// A completed job with this key already exists (idempotent hit)
    ExistingCompleted(Job),
    /// A non-terminal job with this key already exists
    Duplicate,
    /// The store is at capacity
    Full(usize),
}

pub struct JobStore {
    snapshot_path: PathBuf,
    jobs: Mutex<HashMap<String, Job>>,
    dirty: Notify,
    closed: AtomicBool,
}

impl JobStore {
    pub fn new(snapshot_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            snapshot_path,
            jobs: Mutex::new(HashMap::new()),
            dirty: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Read the snapshot file if present. Jobs interrupted mid-processing are
    /// requeued with zero progress; everything else is preserved verbatim. A
    /// corrupted snapshot is logged and treated as empty. Returns the number
    /// of requeued jobs.
    pub fn load(&self) -> usize {
        let raw = match std::fs::read_to_string(&self.snapshot_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(
                    "Failed to read job snapshot {}: {}",
                    self.snapshot_path.display(),
                    e
                );
                return 0;
            }
        };

        let records: Vec<Job> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "Corrupted job snapshot {}: {}; starting empty",
                    self.snapshot_path.display(),
                    e
                );
                return 0;
            }
        };

        let mut requeued = 0;
        let mut jobs = self.jobs.lock().unwrap();
        for mut job in records {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Queued;
                job.progress = 0;
                job.updated_at = Utc::now();
                requeued += 1;
            }
            jobs.insert(job.key.clone(), job);
        }
        info!(
            "Loaded {} job(s) from {} ({} requeued)",
            jobs.len(),
            self.snapshot_path.display(),
            requeued
        );
        requeued
    }

    /// Spawn the debounced flusher task. Runs until `close_and_flush`.
    pub fn spawn_flusher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                store.dirty.notified().await;
                if store.closed.load(Ordering::SeqCst) {
                    break;
                }
                // Wait for mutations to quiesce; a new nudge restarts the window
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_millis(FLUSH_DEBOUNCE_MS)) => break,
                        _ = store.dirty.notified() => {}
                    }
                }
                store.flush();
                if store.closed.load(Ordering::SeqCst) {
                    break;
                }
            }
        })
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Serialize all jobs and write the snapshot atomically. Errors are
    /// logged only.
    pub fn flush(&self) {
        let records = {
            let jobs = self.jobs.lock().unwrap();
            let mut records: Vec<Job> = jobs.values().cloned().collect();
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
            records
        };

        let json = match serde_json::to_vec_pretty(&records) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize job snapshot: {}", e);
                return;
            }
        };

        if let Some(parent) = self.snapshot_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create state dir {}: {}", parent.display(), e);
                return;
            }
        }

        let tmp = self.snapshot_path.with_extension("json.tmp");
        let result = std::fs::write(&tmp, &json)
            .and_then(|_| std::fs::rename(&tmp, &self.snapshot_path));
        match result {
            Ok(()) => debug!(
                "Flushed {} job(s) to {}",
                records.len(),
                self.snapshot_path.display()
            ),
            Err(e) => warn!(
                "Failed to write job snapshot {}: {}",
                self.snapshot_path.display(),
                e
            ),
        }
    }

    /// Final flush on shutdown; stops the flusher task.
    pub fn close_and_flush(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.flush();
        self.dirty.notify_one();
    }

    /// Race-safe admission under a single lock: two submissions with the
    /// same key resolve to the existing completed result, a single new job,
    /// or one success and one duplicate. Failed and cancelled records are
    /// replaced by a fresh submission. Capacity counts all entries,
    /// terminal ones included.
    pub fn admit(&self, job: Job, max_size: usize) -> AdmitOutcome {
        let outcome = {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get(&job.key).map(|j| j.status) {
                Some(JobStatus::Completed) => {
                    return AdmitOutcome::ExistingCompleted(jobs[&job.key].clone());
                }
                Some(JobStatus::Queued) | Some(JobStatus::Processing) => {
                    return AdmitOutcome::Duplicate;
                }
                Some(JobStatus::Failed) | Some(JobStatus::Cancelled) => {
                    // Terminal non-completed entries are replaced in place
                }
                None => {
                    if jobs.len() >= max_size {
                        return AdmitOutcome::Full(jobs.len());
                    }
                }
            }
            jobs.insert(job.key.clone(), job.clone());
            AdmitOutcome::Inserted(job)
        };
        self.mark_dirty();
        outcome
    }

    pub fn insert(&self, job: Job) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(job.key.clone(), job);
        drop(jobs);
        self.mark_dirty();
    }

    pub fn get(&self, key: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(key).cloned()
    }

    pub fn status_of(&self, key: &str) -> Option<JobStatus> {
        self.jobs.lock().unwrap().get(key).map(|j| j.status)
    }

    /// Check-and-delete under one critical section: the entry is removed
    /// unless it is actively processing. A separate status read followed by
    /// a removal would leave a window for the scheduler to claim the job in
    /// between.
    pub fn remove_unless_processing(&self, key: &str) -> RemoveOutcome {
        let outcome = {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.entry(key.to_string()) {
                Entry::Vacant(_) => return RemoveOutcome::Missing,
                Entry::Occupied(entry) if entry.get().status == JobStatus::Processing => {
                    return RemoveOutcome::Refused;
                }
                Entry::Occupied(entry) => RemoveOutcome::Removed(entry.remove()),
            }
        };
        self.mark_dirty();
        outcome
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply an atomic mutation to a job, bumping `updated_at`. Returns the
    /// job after mutation.
    pub fn update<F>(&self, key: &str, mutate: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let updated = {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(key)?;
            mutate(job);
            job.updated_at = Utc::now();
            Some(job.clone())
        };
        if updated.is_some() {
            self.mark_dirty();
        }
        updated
    }

    /// Atomic QUEUED -> PROCESSING transition. A no-op returning false when
    /// the job is gone or no longer queued (cancelled between selection and
    /// execution).
    pub fn mark_processing(&self, key: &str) -> bool {
        let marked = {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(key) {
                Some(job) if job.status == JobStatus::Queued => {
                    job.status = JobStatus::Processing;
                    job.progress = 0;
                    job.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        };
        if marked {
            self.mark_dirty();
        }
        marked
    }

    /// Move a non-terminal job to CANCELLED. Returns false when the job is
    /// unknown or already terminal; terminal records are left untouched.
    pub fn cancel(&self, key: &str) -> bool {
        let changed = {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(key) {
                Some(job) if !job.status.is_terminal() => {
                    job.status = JobStatus::Cancelled;
                    job.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.mark_dirty();
        }
        changed
    }

    /// The unique maximum of the ready set under (priority desc, createdAt
    /// asc, key asc), or None when nothing is queued.
    pub fn next_queued(&self) -> Option<Job> {
        let jobs = self.jobs.lock().unwrap();
        jobs.values()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.key.cmp(&b.key))
            })
            .cloned()
    }

    pub fn processing_count(&self) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count()
    }

    pub fn has_queued(&self) -> bool {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .any(|j| j.status == JobStatus::Queued)
    }

    pub fn stats(&self) -> QueueStats {
        let jobs = self.jobs.lock().unwrap();
        let mut stats = QueueStats {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Delete terminal jobs older than `age`. Artifact files are left alone;
    /// filesystem housekeeping is a separate concern. Returns the count
    /// deleted.
    pub fn cleanup_older_than(&self, age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - age;
        let removed = {
            let mut jobs = self.jobs.lock().unwrap();
            let stale: Vec<String> = jobs
                .values()
                .filter(|j| j.status.is_terminal() && j.updated_at < cutoff)
                .map(|j| j.key.clone())
                .collect();
            for key in &stale {
                jobs.remove(key);
            }
            stale.len()
        };
        if removed > 0 {
            info!("Cleaned up {} stale job(s)", removed);
            self.mark_dirty();
        }
        removed
    }
}
