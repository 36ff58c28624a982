//! End-to-end tests against a real headless Chrome
//!
//! These exercise the production backends and are ignored by default since
//! they need a Chrome/Chromium binary on the host.

use rfrender::{JobKind, JobStatus, RenderService, ServiceConfig, SourceKind, SubmitRequest};
use std::sync::Once;
use std::time::Duration;
use tempfile::TempDir;
use tiny_http::{Response, Server};

static INIT: Once = Once::new();

/// Start a simple test HTTP server
fn start_test_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18099").unwrap();
            for request in server.incoming_requests() {
                let response = Response::from_string(
                    r#"<!DOCTYPE html>
<html>
<head><title>Render Test</title></head>
<body>
<h1 id="ready">Hello from the render test server</h1>
</body>
</html>"#,
                )
                .with_header(
                    "Content-Type: text/html; charset=utf-8"
                        .parse::<tiny_http::Header>()
                        .unwrap(),
                );
                let _ = request.respond(response);
            }
        });
        // Give the server time to start
        std::thread::sleep(Duration::from_millis(100));
    });

    "http://127.0.0.1:18099".to_string()
}

fn chrome_config(tmp: &TempDir) -> ServiceConfig {
    let mut cfg = ServiceConfig::default();
    cfg.storage.output_dir = tmp.path().join("output");
    cfg.storage.state_dir = tmp.path().join("state");
    cfg.queue.retry_attempts = 0;
    cfg
}

async fn wait_terminal(service: &RenderService, kind: JobKind, key: &str) -> rfrender::JobView {
    let deadline = std::time::Instant::now() + Duration::from_secs(120);
    loop {
        if let Some(view) = service.get_status(kind, key) {
            if view.status.is_terminal() {
                return view;
            }
        }
        assert!(
            std::time::Instant::now() < deadline,
            "job '{}' never reached a terminal status",
            key
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires Chrome to be installed
async fn pdf_from_inline_html() {
    let tmp = TempDir::new().unwrap();
    let service = RenderService::start(chrome_config(&tmp));

    let mut request = SubmitRequest::new("invoice-1", SourceKind::InlineHtml, "<h1>Hi</h1>");
    request.options.pdf.print_background = Some(true);
    service.submit_pdf(request).unwrap();

    let view = wait_terminal(&service, JobKind::Pdf, "invoice-1").await;
    assert_eq!(view.status, JobStatus::Completed, "error: {:?}", view.error);
    assert_eq!(view.progress, 100);

    let bytes = std::fs::read(view.file_path.unwrap()).unwrap();
    assert!(bytes.len() > 100, "PDF seems too small");
    assert_eq!(&bytes[0..5], b"%PDF-");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires Chrome to be installed
async fn screenshot_from_remote_url() {
    let base_url = start_test_server();
    let tmp = TempDir::new().unwrap();
    let service = RenderService::start(chrome_config(&tmp));

    let mut request = SubmitRequest::new("shot-1", SourceKind::RemoteUrl, base_url);
    request.options.browser.wait_for_selector = Some("#ready".to_string());
    service.submit_screenshot(request).unwrap();

    let view = wait_terminal(&service, JobKind::Screenshot, "shot-1").await;
    assert_eq!(view.status, JobStatus::Completed, "error: {:?}", view.error);

    let png_data = std::fs::read(view.file_path.unwrap()).unwrap();
    assert!(png_data.len() > 100, "PNG data seems too small");
    // PNG files start with these magic bytes
    assert_eq!(&png_data[0..8], b"\x89PNG\r\n\x1a\n");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires Chrome to be installed
async fn failed_pdf_navigation_records_the_cause() {
    let tmp = TempDir::new().unwrap();
    let service = RenderService::start(chrome_config(&tmp));

    // A routable but unserved port: navigation fails quickly
    let request = SubmitRequest::new("broken", SourceKind::RemoteUrl, "http://127.0.0.1:59999/");
    service.submit_pdf(request).unwrap();

    let view = wait_terminal(&service, JobKind::Pdf, "broken").await;
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.is_some());

    service.shutdown().await;
}
