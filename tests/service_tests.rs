//! Integration tests for the scheduling and rendering pipeline
//!
//! These run the full service (stores, schedulers, workers, persistence)
//! against the stub backend, so no browser is required.

use rfrender::{
    JobKind, JobStatus, JobView, RenderService, ServiceConfig, SourceKind, StubBackend,
    SubmitGuards, SubmitRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> ServiceConfig {
    let mut cfg = ServiceConfig::default();
    cfg.storage.output_dir = tmp.path().join("output");
    cfg.storage.state_dir = tmp.path().join("state");
    cfg.browser.max_concurrent = 1;
    cfg.queue.retry_attempts = 0;
    cfg.queue.retry_delay_ms = 100;
    cfg
}

fn start_service(
    cfg: ServiceConfig,
    pdf: Arc<StubBackend>,
    screenshot: Arc<StubBackend>,
) -> Arc<RenderService> {
    RenderService::with_backends(cfg, pdf, screenshot, SubmitGuards::default())
}

fn pdf_request(key: &str) -> SubmitRequest {
    SubmitRequest::new(key, SourceKind::InlineHtml, "<h1>Hi</h1>")
}

async fn wait_for_status(
    service: &RenderService,
    kind: JobKind,
    key: &str,
    status: JobStatus,
) -> JobView {
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        if let Some(view) = service.get_status(kind, key) {
            if view.status == status {
                return view;
            }
            assert!(
                !(view.status.is_terminal() && view.status != status),
                "job '{}' reached terminal {} while waiting for {}",
                key,
                view.status,
                status
            );
        }
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for '{}' to reach {}",
            key,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn basic_render_completes_with_dated_artifact() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf").with_payload(b"%PDF-stub".to_vec())),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("invoice-1")).unwrap();
    let view = wait_for_status(&service, JobKind::Pdf, "invoice-1", JobStatus::Completed).await;

    assert_eq!(view.progress, 100);
    let path = std::path::PathBuf::from(view.file_path.expect("completed job has a path"));
    let bytes = std::fs::read(&path).expect("artifact exists");
    assert_eq!(bytes, b"%PDF-stub");

    // <outputDir>/<dd-mm-yyyy>/invoice-1__<HH-MM-SS>.pdf
    let folder = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
    let filename = path.file_name().unwrap().to_str().unwrap();
    let parsed = rfrender::naming::parse(filename, Some(folder)).expect("well-formed name");
    assert_eq!(parsed.key, "invoice-1");
    assert_eq!(parsed.extension, "pdf");
    assert!(parsed.timestamp.is_some());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn higher_priority_jumps_the_queue() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf").with_delay_ms(300)),
        Arc::new(StubBackend::new("png")),
    );

    // Occupies the single slot while the others queue up
    service.submit_pdf(pdf_request("running")).unwrap();
    wait_for_status(&service, JobKind::Pdf, "running", JobStatus::Processing).await;

    let mut low = pdf_request("low");
    low.options.priority = Some(1);
    service.submit_pdf(low).unwrap();
    let mut high = pdf_request("high");
    high.options.priority = Some(10);
    service.submit_pdf(high).unwrap();

    let high_done = wait_for_status(&service, JobKind::Pdf, "high", JobStatus::Completed).await;
    let low_done = wait_for_status(&service, JobKind::Pdf, "low", JobStatus::Completed).await;

    let high_at = chrono::DateTime::parse_from_rfc3339(&high_done.updated_at).unwrap();
    let low_at = chrono::DateTime::parse_from_rfc3339(&low_done.updated_at).unwrap();
    assert!(
        high_at < low_at,
        "priority-10 job should finish before the priority-1 job"
    );

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resubmission_of_completed_key_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf")),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("x")).unwrap();
    let first = wait_for_status(&service, JobKind::Pdf, "x", JobStatus::Completed).await;
    let stats_before = service.queue_stats(JobKind::Pdf);

    let job = service.submit_pdf(pdf_request("x")).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.file_path, first.file_path);
    assert_eq!(service.queue_stats(JobKind::Pdf), stats_before);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recreate_replaces_job_and_deletes_old_artifact() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf")),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("x")).unwrap();
    let first = wait_for_status(&service, JobKind::Pdf, "x", JobStatus::Completed).await;
    let old_path = std::path::PathBuf::from(first.file_path.unwrap());
    assert!(old_path.exists());

    // Filenames carry second resolution; make sure the new one differs
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let mut request = pdf_request("x");
    request.re_create = true;
    let job = service.submit_pdf(request).unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let second = wait_for_status(&service, JobKind::Pdf, "x", JobStatus::Completed).await;
    let new_path = std::path::PathBuf::from(second.file_path.unwrap());
    assert_ne!(old_path, new_path);
    assert!(new_path.exists());
    assert!(!old_path.exists(), "old artifact should be deleted");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_during_processing_aborts_cooperatively() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf").with_delay_ms(500)),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("slow")).unwrap();
    wait_for_status(&service, JobKind::Pdf, "slow", JobStatus::Processing).await;

    assert!(service.cancel(JobKind::Pdf, "slow"));
    let view = wait_for_status(&service, JobKind::Pdf, "slow", JobStatus::Cancelled).await;
    assert!(view.file_path.is_none());
    assert!(view.progress < 100);

    // No artifact was written for the cancelled key
    let output = tmp.path().join("output");
    if output.exists() {
        for folder in std::fs::read_dir(&output).unwrap() {
            for file in std::fs::read_dir(folder.unwrap().path()).unwrap() {
                let name = file.unwrap().file_name();
                assert!(
                    !name.to_string_lossy().starts_with("slow__"),
                    "unexpected artifact {:?}",
                    name
                );
            }
        }
    }

    // Cancelled jobs are unselectable forever after
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        service.get_status(JobKind::Pdf, "slow").unwrap().status,
        JobStatus::Cancelled
    );

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_queued_job_is_never_selected() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf").with_delay_ms(300)),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("running")).unwrap();
    wait_for_status(&service, JobKind::Pdf, "running", JobStatus::Processing).await;
    service.submit_pdf(pdf_request("doomed")).unwrap();

    assert!(service.cancel(JobKind::Pdf, "doomed"));
    wait_for_status(&service, JobKind::Pdf, "running", JobStatus::Completed).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let view = service.get_status(JobKind::Pdf, "doomed").unwrap();
    assert_eq!(view.status, JobStatus::Cancelled);
    assert_eq!(view.progress, 0);

    // Cancelling a terminal job reports false
    assert!(!service.cancel(JobKind::Pdf, "doomed"));

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crash_recovery_requeues_interrupted_jobs() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    // Seed a snapshot file directly, as if the service crashed mid-run
    let snapshot_path = cfg.snapshot_path(JobKind::Pdf);
    std::fs::create_dir_all(snapshot_path.parent().unwrap()).unwrap();
    let mk = |key: &str, status: JobStatus, progress: u8, file_path: Option<&str>| {
        let mut job = rfrender::Job::new(
            key.to_string(),
            JobKind::Pdf,
            SourceKind::InlineHtml,
            "<p>x</p>".to_string(),
            Default::default(),
        );
        job.status = status;
        job.progress = progress;
        job.file_path = file_path.map(|p| p.to_string());
        job
    };
    let records = vec![
        mk("was-queued", JobStatus::Queued, 0, None),
        mk("was-processing", JobStatus::Processing, 40, None),
        mk("was-done", JobStatus::Completed, 100, Some("/tmp/was-done.pdf")),
    ];
    std::fs::write(&snapshot_path, serde_json::to_vec_pretty(&records).unwrap()).unwrap();

    let service = start_service(
        cfg,
        Arc::new(StubBackend::new("pdf")),
        Arc::new(StubBackend::new("png")),
    );

    // Both queued jobs (original and requeued) are picked up and complete
    wait_for_status(&service, JobKind::Pdf, "was-queued", JobStatus::Completed).await;
    wait_for_status(&service, JobKind::Pdf, "was-processing", JobStatus::Completed).await;

    // The completed record is preserved verbatim
    let done = service.get_status(JobKind::Pdf, "was-done").unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.file_path.as_deref(), Some("/tmp/was-done.pdf"));

    assert_eq!(service.queue_stats(JobKind::Pdf).total, 3);
    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn processing_never_exceeds_the_concurrency_ceiling() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.browser.max_concurrent = 2;
    let service = start_service(
        cfg,
        Arc::new(StubBackend::new("pdf").with_delay_ms(200)),
        Arc::new(StubBackend::new("png")),
    );

    for i in 0..5 {
        service.submit_pdf(pdf_request(&format!("job-{}", i))).unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = service.queue_stats(JobKind::Pdf);
        assert!(
            stats.processing <= 2,
            "ceiling violated: {} processing",
            stats.processing
        );
        if stats.completed == 5 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "jobs did not drain");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_and_full_queue_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.queue.max_size = 2;
    let service = start_service(
        cfg,
        Arc::new(StubBackend::new("pdf").with_delay_ms(400)),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("a")).unwrap();
    match service.submit_pdf(pdf_request("a")) {
        Err(rfrender::Error::DuplicateKey(key)) => assert_eq!(key, "a"),
        other => panic!("expected duplicate-key, got {:?}", other.map(|j| j.key)),
    }

    service.submit_pdf(pdf_request("b")).unwrap();
    match service.submit_pdf(pdf_request("c")) {
        Err(rfrender::Error::QueueFull(len)) => assert_eq!(len, 2),
        other => panic!("expected queue-full, got {:?}", other.map(|j| j.key)),
    }

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_key_and_unsafe_url_are_rejected_synchronously() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf")),
        Arc::new(StubBackend::new("png")),
    );

    let err = service
        .submit_pdf(SubmitRequest::new("bad key!", SourceKind::InlineHtml, "<p>x</p>"))
        .unwrap_err();
    assert!(matches!(err, rfrender::Error::InvalidInput(_)));

    let err = service
        .submit_screenshot(SubmitRequest::new(
            "shot",
            SourceKind::RemoteUrl,
            "file:///etc/passwd",
        ))
        .unwrap_err();
    assert!(matches!(err, rfrender::Error::UnsafeSource(_)));

    // Nothing was persisted for either rejection
    assert_eq!(service.queue_stats(JobKind::Pdf).total, 0);
    assert_eq!(service.queue_stats(JobKind::Screenshot).total, 0);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retries_absorb_transient_failures() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.queue.retry_attempts = 2;
    let service = start_service(
        cfg,
        Arc::new(StubBackend::new("pdf").failing_first(1)),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("flaky")).unwrap();
    let view = wait_for_status(&service, JobKind::Pdf, "flaky", JobStatus::Completed).await;
    assert_eq!(view.progress, 100);
    assert!(view.error.is_none());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_retries_fail_the_job_with_the_cause() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.queue.retry_attempts = 1;
    let service = start_service(
        cfg,
        Arc::new(StubBackend::new("pdf").failing_first(10)),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("hopeless")).unwrap();
    let view = wait_for_status(&service, JobKind::Pdf, "hopeless", JobStatus::Failed).await;
    assert!(view.error.unwrap().contains("synthetic failure"));

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_attempt_is_interrupted_and_fails() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp); // processing timeout clamps to its 5s floor
    let backend = Arc::new(StubBackend::new("pdf").hanging());
    let service = start_service(cfg, Arc::clone(&backend), Arc::new(StubBackend::new("png")));

    service.submit_pdf(pdf_request("stuck")).unwrap();
    let view = wait_for_status(&service, JobKind::Pdf, "stuck", JobStatus::Failed).await;
    assert!(view.error.unwrap().contains("timed out"));
    assert!(backend.was_interrupted());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn artifact_reader_reports_each_outcome() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf").with_payload(b"%PDF-data".to_vec())),
        Arc::new(StubBackend::new("png").with_delay_ms(400)),
    );

    match service.open_artifact(JobKind::Pdf, "nobody").await {
        Err(rfrender::Error::NotFound(_)) => {}
        _ => panic!("expected not-found"),
    }

    service
        .submit_screenshot(SubmitRequest::new("shot", SourceKind::InlineHtml, "<p>x</p>"))
        .unwrap();
    match service.open_artifact(JobKind::Screenshot, "shot").await {
        Err(rfrender::Error::NotReady { status, .. }) => {
            assert!(status == "QUEUED" || status == "PROCESSING")
        }
        _ => panic!("expected not-ready"),
    }

    service.submit_pdf(pdf_request("done")).unwrap();
    let view = wait_for_status(&service, JobKind::Pdf, "done", JobStatus::Completed).await;

    let handle = service.open_artifact(JobKind::Pdf, "done").await.unwrap();
    assert_eq!(handle.size, b"%PDF-data".len() as u64);
    assert_eq!(handle.mime, "application/pdf");
    assert!(handle.filename.starts_with("done__"));

    std::fs::remove_file(view.file_path.unwrap()).unwrap();
    match service.open_artifact(JobKind::Pdf, "done").await {
        Err(rfrender::Error::ArtifactMissing(_)) => {}
        _ => panic!("expected artifact-missing"),
    }

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remove_is_refused_while_processing() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf").with_delay_ms(400)),
        Arc::new(StubBackend::new("png")),
    );

    service.submit_pdf(pdf_request("busy")).unwrap();
    wait_for_status(&service, JobKind::Pdf, "busy", JobStatus::Processing).await;
    assert!(!service.remove(JobKind::Pdf, "busy"));

    let view = wait_for_status(&service, JobKind::Pdf, "busy", JobStatus::Completed).await;
    let path = std::path::PathBuf::from(view.file_path.unwrap());
    assert!(path.exists());

    assert!(service.remove(JobKind::Pdf, "busy"));
    assert!(!path.exists(), "artifact should be deleted with the entry");
    assert!(service.get_status(JobKind::Pdf, "busy").is_none());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kinds_schedule_independently() {
    let tmp = TempDir::new().unwrap();
    let service = start_service(
        test_config(&tmp),
        Arc::new(StubBackend::new("pdf").with_delay_ms(300)),
        Arc::new(StubBackend::new("png").with_delay_ms(300)),
    );

    service.submit_pdf(pdf_request("p")).unwrap();
    service
        .submit_screenshot(SubmitRequest::new("s", SourceKind::InlineHtml, "<p>x</p>"))
        .unwrap();

    // One slot per kind; both should run at the same time
    wait_for_status(&service, JobKind::Pdf, "p", JobStatus::Processing).await;
    wait_for_status(&service, JobKind::Screenshot, "s", JobStatus::Processing).await;

    wait_for_status(&service, JobKind::Pdf, "p", JobStatus::Completed).await;
    wait_for_status(&service, JobKind::Screenshot, "s", JobStatus::Completed).await;

    service.shutdown().await;
}
