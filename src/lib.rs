//! RFox Render Service
//!
//! A long-running service core that turns HTML documents or remote web pages
//! into PDF documents or raster screenshots using headless Chrome. Clients
//! submit rendering requests under a caller-chosen key; the service queues,
//! schedules, executes, and persists the rendering, then serves the
//! resulting artifact for download.
//!
//! # Architecture
//!
//! - **Job store**: in-memory map of jobs with a debounced JSON snapshot on
//!   disk; interrupted jobs are requeued on restart
//! - **Scheduler**: per-kind priority scheduling (priority desc, age asc)
//!   under a concurrency ceiling, with a coalescing trigger signal
//! - **Render worker**: drives one job through staging and capture with
//!   retries, per-attempt timeouts, and cooperative cancellation
//! - **Browser pool**: one lazily-launched shared Chrome per kind; per-job
//!   tabs, and per-job dedicated browsers when a job overrides launch options
//!
//! # Example
//!
//! ```no_run
//! use rfrender::{RenderService, ServiceConfig, SubmitRequest, SourceKind};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = RenderService::start(ServiceConfig::default());
//! let job = service.submit_pdf(SubmitRequest::new(
//!     "invoice-1",
//!     SourceKind::InlineHtml,
//!     "<h1>Hello</h1>",
//! ))?;
//! println!("queued: {}", job.key);
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod backend;
pub mod browser;
pub mod config;
pub mod error;
pub mod job;
pub mod naming;
pub mod options;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod submit;

mod worker;

pub use artifact::ArtifactHandle;
pub use backend::{AttemptContext, AttemptError, InterruptHandle, RenderBackend, StubBackend};
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use job::{Job, JobKind, JobStatus, JobView, QueueStats, SourceKind};
pub use options::{RenderOptions, Viewport};
pub use service::RenderService;
pub use submit::{HtmlSanitizer, SubmitGuards, SubmitRequest, UrlValidator};
