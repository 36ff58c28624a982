//! Render backend seam
//!
//! A backend turns one job into artifact bytes. The production backend
//! drives headless Chrome (see `browser`); the stub backend lets the
//! scheduler and worker paths be exercised without a browser installed.
//!
//! Backends run on blocking threads, so the attempt context exposes
//! synchronous callbacks: a cancellation probe, a progress sink, and an
//! interrupt handle the worker fires when the attempt deadline trips.

use crate::job::Job;
use crate::options::RenderOptions;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Why an attempt stopped without producing bytes
#[derive(Debug)]
pub struct AttemptError {
    pub message: String,
    /// Cooperative abort observed at a cancellation checkpoint
    pub cancelled: bool,
    /// Best-effort diagnostic screenshot captured before teardown
    pub diagnostic_png: Option<Vec<u8>>,
}

impl AttemptError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cancelled: false,
            diagnostic_png: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: "cancelled".to_string(),
            cancelled: true,
            diagnostic_png: None,
        }
    }
}

/// Hook fired to unblock an attempt whose deadline tripped. The backend
/// arms it with whatever tears its in-flight browser work down.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    hook: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl InterruptHandle {
    pub fn arm<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Fire the armed hook, if any. Consumes it; later calls are no-ops.
    pub fn fire(&self) {
        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Per-attempt callbacks handed to the backend
pub struct AttemptContext {
    cancelled: Arc<dyn Fn() -> bool + Send + Sync>,
    progress: Arc<dyn Fn(u8) + Send + Sync>,
    interrupt: InterruptHandle,
    final_attempt: bool,
}

impl AttemptContext {
    pub fn new(
        cancelled: Arc<dyn Fn() -> bool + Send + Sync>,
        progress: Arc<dyn Fn(u8) + Send + Sync>,
        interrupt: InterruptHandle,
        final_attempt: bool,
    ) -> Self {
        Self {
            cancelled,
            progress,
            interrupt,
            final_attempt,
        }
    }

    /// Cancellation checkpoint: re-reads the job status.
    pub fn is_cancelled(&self) -> bool {
        (self.cancelled)()
    }

    /// Whether the retry loop has no attempts left after this one. Only a
    /// final failure reaches the store, so failure diagnostics are wasted
    /// work on earlier attempts.
    pub fn is_final_attempt(&self) -> bool {
        self.final_attempt
    }

    pub fn report_progress(&self, pct: u8) {
        (self.progress)(pct.min(100));
    }

    pub fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt
    }
}

/// The verb that turns one job into artifact bytes
pub trait RenderBackend: Send + Sync + 'static {
    /// Artifact file extension for a job with these options
    fn extension(&self, options: &RenderOptions) -> &'static str;

    /// Run one attempt to completion. Called on a blocking thread.
    fn render(&self, job: &Job, ctx: &AttemptContext) -> Result<Vec<u8>, AttemptError>;

    /// Release long-lived resources (shared browsers) on service shutdown.
    fn shutdown(&self) {}
}

/// A browser-less backend for tests and dry runs: sleeps for a configurable
/// delay (polling the cancellation checkpoint), optionally fails the first
/// N attempts, then returns a fixed payload.
pub struct StubBackend {
    extension: &'static str,
    payload: Vec<u8>,
    delay_ms: u64,
    fail_first: AtomicU32,
    hang_until_interrupted: bool,
    interrupted: Arc<AtomicBool>,
}

impl StubBackend {
    pub fn new(extension: &'static str) -> Self {
        Self {
            extension,
            payload: b"stub artifact".to_vec(),
            delay_ms: 0,
            fail_first: AtomicU32::new(0),
            hang_until_interrupted: false,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Sleep this long per attempt, checking cancellation every few ms.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Fail the first `n` attempts with a synthetic error.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = AtomicU32::new(n);
        self
    }

    /// Block until the worker fires the interrupt handle (timeout tests).
    pub fn hanging(mut self) -> Self {
        self.hang_until_interrupted = true;
        self
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

impl RenderBackend for StubBackend {
    fn extension(&self, _options: &RenderOptions) -> &'static str {
        self.extension
    }

    fn render(&self, job: &Job, ctx: &AttemptContext) -> Result<Vec<u8>, AttemptError> {
        let flag = Arc::clone(&self.interrupted);
        ctx.interrupt_handle().arm(move || {
            flag.store(true, Ordering::SeqCst);
        });

        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(self.delay_ms);
        while std::time::Instant::now() < deadline {
            if ctx.is_cancelled() {
                return Err(AttemptError::cancelled());
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        if self.hang_until_interrupted {
            while !self.interrupted.load(Ordering::SeqCst) {
                if ctx.is_cancelled() {
                    return Err(AttemptError::cancelled());
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            return Err(AttemptError::failed("interrupted"));
        }

        if ctx.is_cancelled() {
            return Err(AttemptError::cancelled());
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(AttemptError::failed(format!(
                "synthetic failure for '{}'",
                job.key
            )));
        }

        ctx.report_progress(70);
        Ok(self.payload.clone())
    }
}
