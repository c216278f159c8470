//! End-to-end tests that rasterise real PDFs with pdfium.
//!
//! Fixtures are generated with pdfium itself, so no binary files are checked
//! in. The tests skip themselves when libpdfium cannot be loaded; point
//! `PDFIUM_LIB_PATH` at the library or its directory, or install it on the
//! system library path.
//!
//! Run with:
//!   PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture

mod support;

use async_trait::async_trait;
use dashmail::pipeline::notify::compose_message;
use dashmail::pipeline::rasterize::bind_pdfium;
use dashmail::pipeline::request::SCREENSHOT_REQUESTS_PATH;
use dashmail::{
    DashMailError, DispatchConfig, Dispatcher, Filter, Notifier, OutgoingEmail, PageRasterizer,
    PdfiumRasterizer, PollConfig, Recipient, RenderApiClient,
};
use pdfium_render::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use support::{StubResponse, StubServer};
use tracing_subscriber::EnvFilter;

// pdfium keeps process-wide state; one test at a time drives it.
static PDFIUM: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Pipeline logs show up under `--nocapture`; `RUST_LOG` overrides.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dashmail=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Skip this test when libpdfium cannot be bound.
macro_rules! skip_without_pdfium {
    () => {{
        init_tracing();
        if let Err(e) = bind_pdfium(None) {
            println!("SKIP: pdfium not available: {e}");
            return;
        }
    }};
}

/// A PDF with `pages` blank pages of 1 x 2 inches.
fn blank_pdf(pages: usize) -> Vec<u8> {
    let pdfium = bind_pdfium(None).unwrap();
    let mut document = pdfium.create_new_pdf().unwrap();
    for _ in 0..pages {
        document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::new_custom(
                PdfPoints::new(72.0),
                PdfPoints::new(144.0),
            ))
            .unwrap();
    }
    document.save_to_bytes().unwrap()
}

fn assert_close(actual: u32, expected: u32, what: &str) {
    assert!(
        actual.abs_diff(expected) <= 1,
        "{what}: expected ~{expected}px, got {actual}px"
    );
}

#[tokio::test]
async fn three_pages_become_three_jpegs_at_configured_dpi() {
    let _guard = PDFIUM.lock().await;
    skip_without_pdfium!();

    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("dashboard.pdf");
    std::fs::write(&pdf, blank_pdf(3)).unwrap();

    let rasterizer = PdfiumRasterizer::new(100, 85, None);
    let pages = rasterizer.rasterize(&pdf, dir.path()).await.unwrap();

    let names: Vec<_> = pages
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["1.jpg", "2.jpg", "3.jpg"]);

    for page in &pages {
        let (w, h) = image::image_dimensions(page).unwrap();
        assert_close(w, 100, "width");
        assert_close(h, 200, "height");
    }
}

#[tokio::test]
async fn garbage_input_is_a_corrupt_pdf() {
    let _guard = PDFIUM.lock().await;
    skip_without_pdfium!();

    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("dashboard.pdf");
    std::fs::write(&pdf, b"%PDF-1.4 truncated").unwrap();

    let err = PdfiumRasterizer::new(50, 85, None)
        .rasterize(&pdf, dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, DashMailError::CorruptPdf { .. }), "{err}");
}

/// Composes the real MIME message and keeps its wire form.
#[derive(Default)]
struct CapturingNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DashMailError> {
        let message = compose_message(email).await?;
        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
        self.messages.lock().unwrap().push(raw);
        Ok(())
    }
}

#[tokio::test]
async fn single_recipient_end_to_end() {
    let _guard = PDFIUM.lock().await;
    skip_without_pdfium!();

    let server = StubServer::start().await;
    let artifact = "/artifacts/e2e.pdf";
    server.route(
        "POST",
        SCREENSHOT_REQUESTS_PATH,
        vec![StubResponse::json(
            200,
            json!({ "url": server.url(artifact) }).to_string(),
        )],
    );
    let pdf = blank_pdf(1);
    server.route("GET", artifact, vec![StubResponse::bytes(pdf.clone())]);

    let work = tempfile::tempdir().unwrap();
    let config = DispatchConfig::builder()
        .dashboard_id(1234u64)
        .base_url(server.base_url())
        .site("acme")
        .api_key("k")
        .sender("reporting@acme.com")
        .recipient(Recipient::new("user1@acme.com").filter(Filter::new("user_id", "300")))
        .dpi(100)
        .work_dir(work.path())
        .poll(PollConfig {
            interval_ms: 5,
            max_attempts: 5,
            ..PollConfig::default()
        })
        .build()
        .unwrap();

    let backend = RenderApiClient::new(&config.render_api, config.poll.download_timeout_secs)
        .unwrap();
    let rasterizer =
        PdfiumRasterizer::new(config.dpi, config.jpeg_quality, config.pdfium_library_dir.clone());
    let notifier = Arc::new(CapturingNotifier::default());
    let dispatcher = Dispatcher::new(
        config,
        Arc::new(backend),
        Arc::new(rasterizer),
        notifier.clone(),
    );

    let report = dispatcher.run().await.unwrap();

    assert_eq!(report.stats.delivered, 1);
    let delivery = &report.deliveries[0];
    assert_eq!(delivery.poll_attempts, 1);
    assert_eq!(delivery.pages, 1);
    assert_eq!(delivery.pdf_bytes, pdf.len() as u64);

    let posted = &server.requests_to("POST", SCREENSHOT_REQUESTS_PATH)[0];
    assert_eq!(
        posted.json()["data"]["filters"],
        json!([{"name": "user_id", "value": "300"}])
    );

    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    let raw = &messages[0];
    assert!(raw.contains("To: user1@acme.com"));
    assert_eq!(raw.matches("Content-Type: text/html").count(), 1);
    assert_eq!(raw.matches("Content-ID: <image1>").count(), 1);
    assert_eq!(raw.matches("Content-Disposition: attachment").count(), 1);
    assert!(raw.contains("filename=\"dashboard.pdf\""));
    assert!(raw.contains("application/pdf"));
    assert!(raw.contains("image/jpeg"));

    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
}
