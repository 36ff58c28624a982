//! Headless Chrome backend: browser pool, page staging, and capture
//!
//! Per kind, the pool lazily launches a single shared headless Chrome on
//! first demand; concurrent first uses coalesce behind the pool mutex. Tabs
//! are per-job and never shared. A job carrying its own launch override
//! bypasses the pool and gets a dedicated browser for that attempt only.
//!
//! `ChromeBackend` is generic over a `Capture` capability, the verb that
//! turns a staged tab into artifact bytes; PDF and screenshot are the two
//! instances.

use crate::backend::{AttemptContext, AttemptError, RenderBackend};
use crate::config::{BrowserConfig, LaunchConfig, PdfConfig};
use crate::error::{Error, Result};
use crate::job::{Job, JobKind, SourceKind};
use crate::options::{
    BrowserOptions, RenderOptions, ScaleMode, ScreenshotFormat, Viewport, parse_unit_inches,
};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Settle window after navigation so in-flight requests quiesce
const NETWORK_SETTLE_MS: u64 = 500;

/// Pause after nulling animations so the style takes effect
const ANIMATION_SETTLE_MS: u64 = 50;

fn launch_browser(headless: bool, args: &[String], viewport: Viewport) -> Result<Browser> {
    let arg_refs: Vec<&std::ffi::OsStr> = args.iter().map(|a| a.as_ref()).collect();
    let options = LaunchOptions::default_builder()
        .headless(headless)
        .window_size(Some((viewport.width, viewport.height)))
        .args(arg_refs)
        .idle_browser_timeout(Duration::from_secs(86_400))
        .build()
        .map_err(|e| Error::Browser(format!("Failed to build launch options: {}", e)))?;

    Browser::new(options).map_err(|e| Error::Browser(format!("Failed to launch browser: {}", e)))
}

/// Lazily-launched shared browser for one kind
pub struct BrowserPool {
    launch: LaunchConfig,
    viewport: Viewport,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    browser: Option<Arc<Browser>>,
    closed: bool,
}

impl BrowserPool {
    pub fn new(launch: LaunchConfig, viewport: Viewport) -> Self {
        Self {
            launch,
            viewport,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// The shared browser, launching it on first demand. The launch happens
    /// while the pool lock is held, so concurrent first uses coalesce onto a
    /// single Chrome process.
    pub fn shared(&self) -> Result<Arc<Browser>> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::Browser("Browser pool is closed".into()));
        }
        if let Some(browser) = &state.browser {
            return Ok(Arc::clone(browser));
        }
        debug!("Launching shared browser (headless={})", self.launch.headless);
        let browser = Arc::new(launch_browser(
            self.launch.headless,
            &self.launch.args,
            self.viewport,
        )?);
        state.browser = Some(Arc::clone(&browser));
        Ok(browser)
    }

    /// Tear the shared browser down. Workers still holding a handle keep the
    /// process alive until their attempt finishes; new demands fail.
    pub fn close(&self) {
        let browser = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.browser.take()
        };
        drop(browser);
    }
}

/// The verb that turns a staged tab into artifact bytes
pub trait Capture: Send + Sync + 'static {
    fn extension(&self, options: &RenderOptions) -> &'static str;
    fn capture(&self, tab: &Tab, options: &RenderOptions) -> Result<Vec<u8>>;
}

/// Chrome-backed render backend, generic over the capture verb
pub struct ChromeBackend<C: Capture> {
    pool: BrowserPool,
    capture: C,
    browser_cfg: BrowserConfig,
}

impl<C: Capture> ChromeBackend<C> {
    pub fn new(browser_cfg: BrowserConfig, capture: C) -> Self {
        let pool = BrowserPool::new(browser_cfg.launch.clone(), browser_cfg.default_viewport);
        Self {
            pool,
            capture,
            browser_cfg,
        }
    }

    /// Stage the page and capture it. Progress percentages follow the render
    /// state machine; the checkpoint immediately before capture re-reads the
    /// job status.
    fn drive(&self, tab: &Tab, job: &Job, ctx: &AttemptContext) -> std::result::Result<Vec<u8>, AttemptError> {
        let opts = &job.options;
        let timeout_ms = opts
            .browser
            .timeout_ms
            .unwrap_or(self.browser_cfg.default_timeout_ms);
        tab.set_default_timeout(Duration::from_millis(timeout_ms));

        if let Some(ua) = &opts.browser.user_agent {
            tab.set_user_agent(ua, None, None)
                .map_err(|e| AttemptError::failed(format!("Failed to set user agent: {}", e)))?;
        }
        if !opts.browser.headers.is_empty() {
            let headers: HashMap<&str, &str> = opts
                .browser
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            tab.set_extra_http_headers(headers)
                .map_err(|e| AttemptError::failed(format!("Failed to set headers: {}", e)))?;
        }

        let viewport = opts
            .browser
            .viewport
            .unwrap_or(self.browser_cfg.default_viewport);
        apply_viewport(tab, viewport)
            .map_err(|e| AttemptError::failed(e.to_string()))?;
        apply_media_preferences(tab, &opts.browser);

        ctx.report_progress(10);
        let url = match job.source_kind {
            SourceKind::RemoteUrl => job.source.clone(),
            SourceKind::InlineHtml | SourceKind::UploadedHtml => format!(
                "data:text/html;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(&job.source)
            ),
        };
        tab.navigate_to(&url)
            .map_err(|e| AttemptError::failed(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| AttemptError::failed(format!("Wait for navigation failed: {}", e)))?;
        // Let in-flight requests quiesce before inspecting the page
        std::thread::sleep(Duration::from_millis(NETWORK_SETTLE_MS));
        ctx.report_progress(40);

        if ctx.is_cancelled() {
            return Err(AttemptError::cancelled());
        }

        if opts.browser.disable_animations {
            disable_animations(tab)?;
        }
        if let Some(selector) = &opts.browser.wait_for_selector {
            tab.wait_for_element_with_custom_timeout(selector, Duration::from_millis(timeout_ms))
                .map_err(|e| {
                    AttemptError::failed(format!("Selector '{}' did not appear: {}", selector, e))
                })?;
        }
        ctx.report_progress(50);

        if let Some(wait) = opts.browser.wait_after_ms {
            if wait > 0 {
                std::thread::sleep(Duration::from_millis(wait));
            }
        }
        ctx.report_progress(60);

        // Cancellation checkpoint immediately before capture
        if ctx.is_cancelled() {
            return Err(AttemptError::cancelled());
        }

        let bytes = self
            .capture
            .capture(tab, opts)
            .map_err(|e| AttemptError::failed(e.to_string()))?;
        ctx.report_progress(70);
        Ok(bytes)
    }
}

impl<C: Capture> RenderBackend for ChromeBackend<C> {
    fn extension(&self, options: &RenderOptions) -> &'static str {
        self.capture.extension(options)
    }

    fn render(&self, job: &Job, ctx: &AttemptContext) -> std::result::Result<Vec<u8>, AttemptError> {
        let dedicated = job.options.browser.launch.clone();
        let browser = match &dedicated {
            Some(launch) => {
                let viewport = job
                    .options
                    .browser
                    .viewport
                    .unwrap_or(self.browser_cfg.default_viewport);
                debug!("Launching dedicated browser for job '{}'", job.key);
                Arc::new(
                    launch_browser(launch.headless, &launch.args, viewport)
                        .map_err(|e| AttemptError::failed(e.to_string()))?,
                )
            }
            None => self
                .pool
                .shared()
                .map_err(|e| AttemptError::failed(e.to_string()))?,
        };

        let tab = browser
            .new_tab()
            .map_err(|e| AttemptError::failed(format!("Failed to create tab: {}", e)))?;
        {
            let tab = Arc::clone(&tab);
            ctx.interrupt_handle().arm(move || {
                let _ = tab.close(true);
            });
        }

        let result = self.drive(&tab, job, ctx);
        // Only the final failure reaches the store, so earlier attempts skip
        // the diagnostic round-trip
        let result = match result {
            Err(mut err)
                if job.kind == JobKind::Pdf && !err.cancelled && ctx.is_final_attempt() =>
            {
                err.diagnostic_png = diagnostic_screenshot(&tab);
                Err(err)
            }
            other => other,
        };

        if let Err(e) = tab.close(true) {
            debug!("Tab close failed: {}", e);
        }
        // A dedicated browser dies with this drop; the pool browser lives on
        drop(browser);
        result
    }

    fn shutdown(&self) {
        self.pool.close();
    }
}

fn apply_viewport(tab: &Tab, viewport: Viewport) -> Result<()> {
    tab.call_method(Emulation::SetDeviceMetricsOverride {
        width: viewport.width,
        height: viewport.height,
        device_scale_factor: 1.0,
        mobile: false,
        scale: None,
        screen_width: None,
        screen_height: None,
        position_x: None,
        position_y: None,
        dont_set_visible_size: None,
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    })
    .map_err(|e| Error::Browser(format!("Failed to set viewport: {}", e)))?;
    Ok(())
}

/// Emulated media preferences (color scheme, reduced motion). Non-critical;
/// failures are logged and the render continues.
fn apply_media_preferences(tab: &Tab, browser_opts: &BrowserOptions) {
    let mut features = Vec::new();
    if let Some(scheme) = browser_opts.color_scheme {
        features.push(Emulation::MediaFeature {
            name: "prefers-color-scheme".to_string(),
            value: scheme.as_media_value().to_string(),
        });
    }
    if browser_opts.disable_animations {
        features.push(Emulation::MediaFeature {
            name: "prefers-reduced-motion".to_string(),
            value: "reduce".to_string(),
        });
    }
    if features.is_empty() {
        return;
    }
    let _ = tab
        .call_method(Emulation::SetEmulatedMedia {
            media: None,
            features: Some(features),
        })
        .map_err(|e| warn!("Failed to set emulated media: {}", e));
}

/// Null out animations and transitions on every element and their
/// pseudo-elements, then give the style a moment to apply.
fn disable_animations(tab: &Tab) -> std::result::Result<(), AttemptError> {
    let script = r#"(function(){
        const style = document.createElement('style');
        style.textContent = '*, *::before, *::after { animation: none !important; animation-duration: 0s !important; transition: none !important; transition-duration: 0s !important; }';
        document.head.appendChild(style);
    })()"#;
    tab.evaluate(script, false)
        .map_err(|e| AttemptError::failed(format!("Failed to disable animations: {}", e)))?;
    std::thread::sleep(Duration::from_millis(ANIMATION_SETTLE_MS));
    Ok(())
}

fn eval_number(tab: &Tab, expr: &str) -> Result<f64> {
    let eval = tab
        .evaluate(expr, false)
        .map_err(|e| Error::Browser(format!("Evaluation failed: {}", e)))?;
    eval.value
        .and_then(|v| v.as_f64())
        .ok_or_else(|| Error::Browser(format!("No numeric result for '{}'", expr)))
}

/// Scrollable content size in CSS pixels, for full-page capture
fn page_content_size(tab: &Tab) -> Result<(f64, f64)> {
    let width = eval_number(
        tab,
        "Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0)",
    )?;
    let height = eval_number(
        tab,
        "Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)",
    )?;
    Ok((width.max(1.0), height.max(1.0)))
}

fn device_pixel_ratio(tab: &Tab) -> f64 {
    eval_number(tab, "window.devicePixelRatio").unwrap_or(1.0)
}

/// Best-effort screenshot of whatever the page looks like right now, used
/// as a failure diagnostic for PDF jobs.
fn diagnostic_screenshot(tab: &Tab) -> Option<Vec<u8>> {
    match tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Failed to capture diagnostic screenshot: {}", e);
            None
        }
    }
}

/// PDF capture: format-vs-explicit-dimensions policy and margin resolution
pub struct PdfCapture {
    defaults: PdfConfig,
}

impl PdfCapture {
    pub fn new(defaults: PdfConfig) -> Self {
        Self { defaults }
    }
}

impl Capture for PdfCapture {
    fn extension(&self, _options: &RenderOptions) -> &'static str {
        "pdf"
    }

    fn capture(&self, tab: &Tab, options: &RenderOptions) -> Result<Vec<u8>> {
        let pdf = &options.pdf;

        // Explicit dimensions win over the paper format
        let (format_w, format_h) = pdf.format.unwrap_or(self.defaults.default_format).inches();
        let paper_width = match &pdf.width {
            Some(d) => d.to_inches()?,
            None => format_w,
        };
        let paper_height = match &pdf.height {
            Some(d) => d.to_inches()?,
            None => format_h,
        };

        let defaults = &self.defaults.default_margin;
        let margin = pdf.margin.clone().unwrap_or_default();
        let margin_top = parse_unit_inches(margin.top.as_deref().unwrap_or(&defaults.top))?;
        let margin_right = parse_unit_inches(margin.right.as_deref().unwrap_or(&defaults.right))?;
        let margin_bottom =
            parse_unit_inches(margin.bottom.as_deref().unwrap_or(&defaults.bottom))?;
        let margin_left = parse_unit_inches(margin.left.as_deref().unwrap_or(&defaults.left))?;

        let print_options = PrintToPdfOptions {
            landscape: Some(pdf.landscape),
            display_header_footer: Some(pdf.display_header_footer),
            print_background: Some(pdf.print_background.unwrap_or(self.defaults.print_background)),
            scale: pdf.scale,
            paper_width: Some(paper_width),
            paper_height: Some(paper_height),
            margin_top: Some(margin_top),
            margin_bottom: Some(margin_bottom),
            margin_left: Some(margin_left),
            margin_right: Some(margin_right),
            header_template: pdf.header_template.clone(),
            footer_template: pdf.footer_template.clone(),
            ..Default::default()
        };

        tab.print_to_pdf(Some(print_options))
            .map_err(|e| Error::Browser(format!("PDF generation failed: {}", e)))
    }
}

/// Screenshot capture: clip-vs-full-page policy, format and quality
pub struct ShotCapture;

impl Capture for ShotCapture {
    fn extension(&self, options: &RenderOptions) -> &'static str {
        options.screenshot.format.unwrap_or_default().extension()
    }

    fn capture(&self, tab: &Tab, options: &RenderOptions) -> Result<Vec<u8>> {
        let shot = &options.screenshot;
        let format = shot.format.unwrap_or_default();

        if shot.omit_background && format == ScreenshotFormat::Png {
            tab.set_transparent_background_color()
                .map_err(|e| Error::Browser(format!("Failed to set transparent background: {}", e)))?;
        }

        let scale = match shot.scale.unwrap_or_default() {
            ScaleMode::Css => 1.0,
            ScaleMode::Device => device_pixel_ratio(tab),
        };

        // A clip wins over full-page; full-page defaults to true
        let clip = if let Some(c) = &shot.clip {
            Some(Page::Viewport {
                x: c.x,
                y: c.y,
                width: c.width,
                height: c.height,
                scale,
            })
        } else if shot.full_page.unwrap_or(true) {
            let (width, height) = page_content_size(tab)?;
            Some(Page::Viewport {
                x: 0.0,
                y: 0.0,
                width,
                height,
                scale,
            })
        } else {
            None
        };

        let cdp_format = match format {
            ScreenshotFormat::Png => Page::CaptureScreenshotFormatOption::Png,
            ScreenshotFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
        };
        let quality = match format {
            ScreenshotFormat::Jpeg => shot.quality,
            ScreenshotFormat::Png => None,
        };

        tab.capture_screenshot(cdp_format, quality, clip, true)
            .map_err(|e| Error::Browser(format!("Screenshot failed: {}", e)))
    }
}
