use clap::{Args, Parser, Subcommand, ValueEnum};
use rfrender::job::{Job, JobStatus};
use rfrender::options::{PaperFormat, ScreenshotFormat, Viewport};
use rfrender::{JobKind, RenderService, ServiceConfig, SourceKind, SubmitRequest};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[clap(author, version, about = "Render HTML documents and web pages to PDF or screenshots")]
struct Cli {
    /// Path to a settings JSON file (merged with defaults)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Override the artifact output directory
    #[clap(long, global = true)]
    out_dir: Option<PathBuf>,

    /// Override the state directory holding job snapshots
    #[clap(long, global = true)]
    state_dir: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a PDF and wait for the result
    Pdf {
        /// Job key; also embedded in the artifact filename
        key: String,
        #[clap(flatten)]
        source: SourceArgs,
        #[clap(flatten)]
        common: CommonRenderArgs,
        /// Paper format (A4, A3, A5, Letter, Legal)
        #[clap(long, value_parser = parse_paper_format)]
        format: Option<PaperFormat>,
        /// Landscape orientation
        #[clap(long, action = clap::ArgAction::SetTrue)]
        landscape: bool,
        /// Print CSS backgrounds
        #[clap(long, action = clap::ArgAction::SetTrue)]
        print_background: bool,
    },

    /// Render a screenshot and wait for the result
    Screenshot {
        key: String,
        #[clap(flatten)]
        source: SourceArgs,
        #[clap(flatten)]
        common: CommonRenderArgs,
        /// Output as JPEG with this quality (0..=100) instead of PNG
        #[clap(long)]
        jpeg_quality: Option<u32>,
        /// Capture only the viewport instead of the full page
        #[clap(long, action = clap::ArgAction::SetTrue)]
        viewport_only: bool,
    },

    /// Show a job's recorded status from the snapshot file
    Status { kind: KindArg, key: String },

    /// Queue statistics for one kind
    Stats { kind: KindArg },

    /// Delete terminal jobs older than the given age from the snapshots
    Cleanup {
        /// Age threshold in hours (defaults to the configured value)
        #[clap(long)]
        hours: Option<u32>,
    },

    /// Parse an artifact filename back into its key and timestamp
    Parse {
        filename: String,
        /// The dd-mm-yyyy date folder the file was found under
        #[clap(long)]
        folder: Option<String>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Remote URL to render
    #[clap(long, conflicts_with_all = ["html", "file"])]
    url: Option<String>,
    /// Inline HTML to render
    #[clap(long, conflicts_with = "file")]
    html: Option<String>,
    /// Path to an HTML file to render
    #[clap(long)]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct CommonRenderArgs {
    /// Queue priority, 1..=10, higher runs earlier
    #[clap(long)]
    priority: Option<u8>,
    /// Navigation timeout in milliseconds
    #[clap(long)]
    timeout_ms: Option<u64>,
    /// Viewport as WIDTHxHEIGHT, e.g. 1280x720
    #[clap(long, value_parser = parse_viewport)]
    viewport: Option<Viewport>,
    /// CSS selector to wait for before capture
    #[clap(long)]
    wait_for: Option<String>,
    /// Extra wait after load, milliseconds
    #[clap(long)]
    wait_after_ms: Option<u64>,
    /// Null out CSS animations before capture
    #[clap(long, action = clap::ArgAction::SetTrue)]
    disable_animations: bool,
    /// Replace any prior job with this key (deletes its artifact)
    #[clap(long, action = clap::ArgAction::SetTrue)]
    re_create: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Pdf,
    Screenshot,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Pdf => JobKind::Pdf,
            KindArg::Screenshot => JobKind::Screenshot,
        }
    }
}

fn parse_paper_format(s: &str) -> Result<PaperFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "a4" => Ok(PaperFormat::A4),
        "a3" => Ok(PaperFormat::A3),
        "a5" => Ok(PaperFormat::A5),
        "letter" => Ok(PaperFormat::Letter),
        "legal" => Ok(PaperFormat::Legal),
        other => Err(format!("Unknown paper format '{}'", other)),
    }
}

fn parse_viewport(s: &str) -> Result<Viewport, String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("Viewport '{}' is not WIDTHxHEIGHT", s))?;
    let width = w.parse().map_err(|_| format!("Bad viewport width '{}'", w))?;
    let height = h.parse().map_err(|_| format!("Bad viewport height '{}'", h))?;
    Ok(Viewport { width, height })
}

fn load_config(cli: &Cli) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(dir) = &cli.out_dir {
        config.storage.output_dir = dir.clone();
    }
    if let Some(dir) = &cli.state_dir {
        config.storage.state_dir = dir.clone();
    }
    Ok(config.normalized())
}

fn resolve_source(source: SourceArgs) -> Result<(SourceKind, String), Box<dyn std::error::Error>> {
    if let Some(url) = source.url {
        return Ok((SourceKind::RemoteUrl, url));
    }
    if let Some(html) = source.html {
        return Ok((SourceKind::InlineHtml, html));
    }
    if let Some(path) = source.file {
        let html = std::fs::read_to_string(&path)?;
        return Ok((SourceKind::UploadedHtml, html));
    }
    Err("One of --url, --html, or --file is required".into())
}

fn build_request(
    key: String,
    source: SourceArgs,
    common: CommonRenderArgs,
) -> Result<SubmitRequest, Box<dyn std::error::Error>> {
    let (source_kind, source) = resolve_source(source)?;
    let mut request = SubmitRequest::new(key, source_kind, source);
    request.re_create = common.re_create;
    request.options.priority = common.priority;
    request.options.browser.timeout_ms = common.timeout_ms;
    request.options.browser.viewport = common.viewport;
    request.options.browser.wait_for_selector = common.wait_for;
    request.options.browser.wait_after_ms = common.wait_after_ms;
    request.options.browser.disable_animations = common.disable_animations;
    Ok(request)
}

/// Submit one job and poll until it reaches a terminal status.
async fn run_and_wait(
    config: ServiceConfig,
    kind: JobKind,
    request: SubmitRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = RenderService::start(config);
    let key = request.key.clone();
    let job = service.submit(kind, request)?;
    println!("Job '{}' submitted ({})", job.key, job.status);

    let mut last_progress = None;
    let outcome = loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let Some(view) = service.get_status(kind, &key) else {
            break Err("Job disappeared from the store".into());
        };
        if last_progress != Some(view.progress) {
            eprintln!("  {}% ({})", view.progress, view.status);
            last_progress = Some(view.progress);
        }
        match view.status {
            JobStatus::Completed => {
                println!("Artifact: {}", view.file_path.unwrap_or_default());
                break Ok(());
            }
            JobStatus::Failed => {
                break Err(format!(
                    "Rendering failed: {}",
                    view.error.unwrap_or_else(|| "unknown error".into())
                )
                .into());
            }
            JobStatus::Cancelled => break Err("Job was cancelled".into()),
            JobStatus::Queued | JobStatus::Processing => {}
        }
    };

    service.shutdown().await;
    outcome
}

fn read_snapshot(config: &ServiceConfig, kind: JobKind) -> Vec<Job> {
    let path = config.snapshot_path(kind);
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

async fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Pdf {
            key,
            source,
            common,
            format,
            landscape,
            print_background,
        } => {
            let mut request = build_request(key, source, common)?;
            request.options.pdf.format = format;
            request.options.pdf.landscape = landscape;
            if print_background {
                request.options.pdf.print_background = Some(true);
            }
            run_and_wait(config, JobKind::Pdf, request).await
        }

        Commands::Screenshot {
            key,
            source,
            common,
            jpeg_quality,
            viewport_only,
        } => {
            let mut request = build_request(key, source, common)?;
            if let Some(quality) = jpeg_quality {
                request.options.screenshot.format = Some(ScreenshotFormat::Jpeg);
                request.options.screenshot.quality = Some(quality);
            }
            if viewport_only {
                request.options.screenshot.full_page = Some(false);
            }
            run_and_wait(config, JobKind::Screenshot, request).await
        }

        Commands::Status { kind, key } => {
            let records = read_snapshot(&config, kind.into());
            match records.iter().find(|j| j.key == key) {
                Some(job) => {
                    let view = rfrender::JobView::from(job);
                    println!("{}", serde_json::to_string_pretty(&view)?);
                    Ok(())
                }
                None => Err(format!("No job found for key '{}'", key).into()),
            }
        }

        Commands::Stats { kind } => {
            let records = read_snapshot(&config, kind.into());
            let mut stats = rfrender::QueueStats {
                total: records.len(),
                ..Default::default()
            };
            for job in &records {
                match job.status {
                    JobStatus::Queued => stats.queued += 1,
                    JobStatus::Processing => stats.processing += 1,
                    JobStatus::Completed => stats.completed += 1,
                    JobStatus::Failed => stats.failed += 1,
                    JobStatus::Cancelled => stats.cancelled += 1,
                }
            }
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }

        Commands::Cleanup { hours } => {
            let hours = hours.unwrap_or(config.storage.cleanup_after_hours);
            let age = chrono::Duration::hours(hours as i64);
            let mut removed = 0;
            for kind in [JobKind::Pdf, JobKind::Screenshot] {
                let store = rfrender::store::JobStore::new(config.snapshot_path(kind));
                store.load();
                removed += store.cleanup_older_than(age);
                store.flush();
            }
            println!("Removed {} job(s) older than {}h", removed, hours);
            Ok(())
        }

        Commands::Parse { filename, folder } => {
            match rfrender::naming::parse(&filename, folder.as_deref()) {
                Some(parsed) => {
                    println!("Key:   {}", parsed.key);
                    println!("Time:  {}", parsed.time.format("%H:%M:%S"));
                    if let Some(ts) = parsed.timestamp {
                        println!("Stamp: {}", ts);
                    }
                    if parsed.error_artifact {
                        println!("Type:  diagnostic screenshot");
                    }
                    Ok(())
                }
                None => Err(format!("'{}' is not a recognized artifact filename", filename).into()),
            }
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run_command(cli).await {
        eprintln!("Command failed: {}", e);
        std::process::exit(1);
    }
}
