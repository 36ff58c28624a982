//! Service configuration snapshot
//!
//! The settings loader itself lives outside the core; the service only ever
//! sees an immutable, merged-with-defaults snapshot of the tunables. Every
//! numeric field is clamped into its documented range by `normalized()` so
//! downstream code never has to re-validate.

use crate::error::{Error, Result};
use crate::options::{PaperFormat, Viewport};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Immutable view of the service tunables
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    pub browser: BrowserConfig,
    pub pdf: PdfConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
}

/// Browser pool and per-context defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Maximum jobs in PROCESSING at once, per kind (1..=10)
    pub max_concurrent: usize,
    /// Default navigation timeout in milliseconds (1000..=120000)
    pub default_timeout_ms: u64,
    /// Default viewport applied when a job does not override it
    pub default_viewport: Viewport,
    /// Launch options for the shared pool browsers
    pub launch: LaunchConfig,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            default_timeout_ms: 30_000,
            default_viewport: Viewport::default(),
            launch: LaunchConfig::default(),
        }
    }
}

/// How headless Chrome is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchConfig {
    pub headless: bool,
    pub args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            args: Vec::new(),
        }
    }
}

/// PDF capture defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PdfConfig {
    pub default_format: PaperFormat,
    pub default_margin: MarginConfig,
    pub print_background: bool,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            default_format: PaperFormat::A4,
            default_margin: MarginConfig::default(),
            print_background: false,
        }
    }
}

/// Four-sided margin, unit strings (`px`, `in`, `cm`, `mm`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarginConfig {
    pub top: String,
    pub right: String,
    pub bottom: String,
    pub left: String,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            top: "10mm".to_string(),
            right: "10mm".to_string(),
            bottom: "10mm".to_string(),
            left: "10mm".to_string(),
        }
    }
}

/// Queue and retry tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    /// Store capacity, counting all entries including terminal ones (1..=1000)
    pub max_size: usize,
    /// Per-attempt deadline in milliseconds (5000..=300000)
    pub processing_timeout_ms: u64,
    /// Retries after the first failed attempt (0..=5)
    pub retry_attempts: u32,
    /// Sleep between attempts in milliseconds (100..=30000)
    pub retry_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            processing_timeout_ms: 60_000,
            retry_attempts: 1,
            retry_delay_ms: 1_000,
        }
    }
}

/// Where artifacts and store snapshots live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// Root for date-partitioned artifact folders
    pub output_dir: PathBuf,
    /// Directory holding the per-kind job snapshot files
    pub state_dir: PathBuf,
    /// Age after which terminal jobs may be cleaned up (1..=720 hours)
    pub cleanup_after_hours: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            state_dir: PathBuf::from("state"),
            cleanup_after_hours: 24,
        }
    }
}

impl ServiceConfig {
    /// Read a settings JSON file and merge it with defaults. Absent fields
    /// keep their default values; out-of-range values are clamped.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read settings {}: {}", path.display(), e)))?;
        let cfg: ServiceConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Storage(format!("Failed to parse settings {}: {}", path.display(), e)))?;
        Ok(cfg.normalized())
    }

    /// Clamp every tunable into its documented range.
    pub fn normalized(mut self) -> Self {
        self.browser.max_concurrent = self.browser.max_concurrent.clamp(1, 10);
        self.browser.default_timeout_ms = self.browser.default_timeout_ms.clamp(1_000, 120_000);
        self.queue.max_size = self.queue.max_size.clamp(1, 1_000);
        self.queue.processing_timeout_ms = self.queue.processing_timeout_ms.clamp(5_000, 300_000);
        self.queue.retry_attempts = self.queue.retry_attempts.min(5);
        self.queue.retry_delay_ms = self.queue.retry_delay_ms.clamp(100, 30_000);
        self.storage.cleanup_after_hours = self.storage.cleanup_after_hours.clamp(1, 720);
        self
    }

    /// Snapshot file path for one job kind, under the state directory.
    pub fn snapshot_path(&self, kind: crate::job::JobKind) -> PathBuf {
        self.storage.state_dir.join(format!("{}-jobs.json", kind.as_str().to_lowercase()))
    }
}
