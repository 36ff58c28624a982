//! Render options: the per-job tunables for browser staging and capture
//!
//! The option groups mirror what callers may send alongside a submission.
//! Two documented precedence rules live here: explicit PDF width/height win
//! over a paper format, and a screenshot clip wins over `full_page`.

use crate::error::{Error, Result};
use crate::job::JobKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Viewport dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Per-job option bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderOptions {
    pub browser: BrowserOptions,
    pub pdf: PdfOptions,
    pub screenshot: ScreenshotOptions,
    /// Queue priority, 1..=10, higher runs earlier. Clamped on submission.
    pub priority: Option<u8>,
}

/// Browser staging options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserOptions {
    /// Navigation timeout in milliseconds, capped at 120000
    pub timeout_ms: Option<u64>,
    pub viewport: Option<Viewport>,
    pub user_agent: Option<String>,
    /// Extra request headers sent with every page request
    pub headers: HashMap<String, String>,
    /// CSS selector to wait for before capture
    pub wait_for_selector: Option<String>,
    /// Additional wait after load, milliseconds, capped at 60000
    pub wait_after_ms: Option<u64>,
    /// Null out CSS animations and transitions before capture
    pub disable_animations: bool,
    pub color_scheme: Option<ColorScheme>,
    /// Per-job launch override; forces a dedicated browser instance
    pub launch: Option<JobLaunchOverride>,
}

/// Per-job browser launch override
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobLaunchOverride {
    pub headless: bool,
    pub args: Vec<String>,
}

impl Default for JobLaunchOverride {
    fn default() -> Self {
        Self {
            headless: true,
            args: Vec::new(),
        }
    }
}

/// Emulated `prefers-color-scheme`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorScheme {
    #[serde(rename = "light")]
    Light,
    #[serde(rename = "dark")]
    Dark,
    #[serde(rename = "no-preference")]
    NoPreference,
}

impl ColorScheme {
    pub fn as_media_value(&self) -> &'static str {
        match self {
            ColorScheme::Light => "light",
            ColorScheme::Dark => "dark",
            ColorScheme::NoPreference => "no-preference",
        }
    }
}

/// PDF capture options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PdfOptions {
    /// Paper format; ignored when explicit width/height are supplied
    pub format: Option<PaperFormat>,
    pub width: Option<Dimension>,
    pub height: Option<Dimension>,
    pub landscape: bool,
    pub margin: Option<Margin>,
    pub print_background: Option<bool>,
    /// Render scale, 0 < scale <= 2
    pub scale: Option<f64>,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub display_header_footer: bool,
}

/// Four-sided margin with unit strings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Margin {
    pub top: Option<String>,
    pub right: Option<String>,
    pub bottom: Option<String>,
    pub left: Option<String>,
}

/// Named paper sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperFormat {
    A4,
    A3,
    A5,
    Letter,
    Legal,
}

impl Default for PaperFormat {
    fn default() -> Self {
        PaperFormat::A4
    }
}

impl PaperFormat {
    /// Paper dimensions in inches (width, height), portrait orientation
    pub fn inches(&self) -> (f64, f64) {
        match self {
            PaperFormat::A4 => (8.27, 11.69),
            PaperFormat::A3 => (11.69, 16.54),
            PaperFormat::A5 => (5.83, 8.27),
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Legal => (8.5, 14.0),
        }
    }
}

/// A length given either as integer pixels or as a string with a unit
/// (`px`, `in`, `cm`, `mm`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Dimension {
    Pixels(u32),
    Text(String),
}

impl Dimension {
    /// Convert to inches (CSS reference pixel: 96 per inch)
    pub fn to_inches(&self) -> Result<f64> {
        match self {
            Dimension::Pixels(px) => Ok(*px as f64 / 96.0),
            Dimension::Text(s) => parse_unit_inches(s),
        }
    }
}

/// Parse a unit string such as `"10px"`, `"1in"`, `"2.5cm"`, `"15mm"` into inches.
pub fn parse_unit_inches(s: &str) -> Result<f64> {
    let s = s.trim();
    let (value, unit) = s
        .find(|c: char| c.is_ascii_alphabetic())
        .map(|i| s.split_at(i))
        .ok_or_else(|| Error::InvalidInput(format!("Missing unit in length '{}'", s)))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Invalid length '{}'", s)))?;
    if value < 0.0 {
        return Err(Error::InvalidInput(format!("Negative length '{}'", s)));
    }
    match unit.trim() {
        "px" => Ok(value / 96.0),
        "in" => Ok(value),
        "cm" => Ok(value / 2.54),
        "mm" => Ok(value / 25.4),
        other => Err(Error::InvalidInput(format!("Unknown unit '{}'", other))),
    }
}

/// Screenshot capture options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScreenshotOptions {
    pub format: Option<ScreenshotFormat>,
    /// JPEG quality 0..=100; only meaningful when format is jpeg
    pub quality: Option<u32>,
    /// Capture the whole scrollable page. Defaults to true; a clip wins.
    pub full_page: Option<bool>,
    pub clip: Option<ClipRect>,
    /// Transparent background, PNG only
    pub omit_background: bool,
    pub scale: Option<ScaleMode>,
}

/// Screenshot output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenshotFormat {
    #[serde(rename = "png")]
    Png,
    #[serde(rename = "jpeg")]
    Jpeg,
}

impl Default for ScreenshotFormat {
    fn default() -> Self {
        ScreenshotFormat::Png
    }
}

impl ScreenshotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg => "jpeg",
        }
    }
}

/// Clip rectangle in CSS pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Screenshot scale mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMode {
    #[serde(rename = "css")]
    Css,
    #[serde(rename = "device")]
    Device,
}

impl Default for ScaleMode {
    fn default() -> Self {
        ScaleMode::Css
    }
}

impl RenderOptions {
    /// Validate option bounds for the given kind. Out-of-range values are
    /// rejected here, before the job is admitted.
    pub fn validate(&self, kind: JobKind) -> Result<()> {
        if let Some(t) = self.browser.timeout_ms {
            if t == 0 || t > 120_000 {
                return Err(Error::InvalidInput(format!(
                    "Navigation timeout {}ms out of range (1..=120000)",
                    t
                )));
            }
        }
        if let Some(w) = self.browser.wait_after_ms {
            if w > 60_000 {
                return Err(Error::InvalidInput(format!(
                    "Post-load wait {}ms exceeds 60000",
                    w
                )));
            }
        }
        if let Some(vp) = &self.browser.viewport {
            if vp.width == 0 || vp.height == 0 {
                return Err(Error::InvalidInput("Viewport dimensions must be non-zero".into()));
            }
        }
        match kind {
            JobKind::Pdf => {
                if let Some(scale) = self.pdf.scale {
                    if scale <= 0.0 || scale > 2.0 {
                        return Err(Error::InvalidInput(format!(
                            "PDF scale {} out of range (0 < scale <= 2)",
                            scale
                        )));
                    }
                }
                // Surface unit errors at admission rather than mid-render
                if let Some(w) = &self.pdf.width {
                    w.to_inches()?;
                }
                if let Some(h) = &self.pdf.height {
                    h.to_inches()?;
                }
                if let Some(m) = &self.pdf.margin {
                    for side in [&m.top, &m.right, &m.bottom, &m.left].into_iter().flatten() {
                        parse_unit_inches(side)?;
                    }
                }
            }
            JobKind::Screenshot => {
                if let Some(q) = self.screenshot.quality {
                    if q > 100 {
                        return Err(Error::InvalidInput(format!(
                            "JPEG quality {} out of range (0..=100)",
                            q
                        )));
                    }
                }
                if let Some(c) = &self.screenshot.clip {
                    if c.width <= 0.0 || c.height <= 0.0 {
                        return Err(Error::InvalidInput("Clip rectangle must have positive size".into()));
                    }
                }
            }
        }
        Ok(())
    }

    /// The clamped queue priority (default 5).
    pub fn effective_priority(&self) -> u8 {
        self.priority.unwrap_or(5).clamp(1, 10)
    }
}
