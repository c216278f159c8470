//! Driver loop: run the pipeline for every configured recipient, in order.
//!
//! Recipients are processed strictly one after another. Each one gets a fresh
//! scratch directory holding `dashboard.pdf` and the page images, removed as
//! soon as its message has been sent, so no two recipients ever share files.
//!
//! Under [`FailurePolicy::FailFast`] (the default) the first failure stops
//! the run and is returned as [`DashMailError::RecipientFailed`]; remaining
//! recipients are not attempted. Under [`FailurePolicy::Continue`] the failure
//! is recorded in that recipient's [`DeliveryResult`] and the loop moves on.

use crate::config::{DispatchConfig, FailurePolicy, Recipient};
use crate::error::{DashMailError, RecipientError, Stage};
use crate::options::RenderOptions;
use crate::output::{DeliveryResult, DispatchReport, DispatchStats};
use crate::pipeline::notify::{Notifier, OutgoingEmail, SmtpNotifier};
use crate::pipeline::poll;
use crate::pipeline::rasterize::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::request::{RenderApiClient, RenderBackend};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{error, info, warn};

/// Name of the downloaded PDF inside a recipient's scratch directory.
pub const PDF_FILE_NAME: &str = "dashboard.pdf";

/// Runs the render → download → rasterise → send pipeline per recipient.
pub struct Dispatcher {
    config: DispatchConfig,
    backend: Arc<dyn RenderBackend>,
    rasterizer: Arc<dyn PageRasterizer>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    /// Assemble a dispatcher from explicit stage implementations.
    pub fn new(
        config: DispatchConfig,
        backend: Arc<dyn RenderBackend>,
        rasterizer: Arc<dyn PageRasterizer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            backend,
            rasterizer,
            notifier,
        }
    }

    /// Dispatcher wired to the real render API, pdfium and SMTP relay.
    pub fn from_config(config: DispatchConfig) -> Result<Self, DashMailError> {
        let backend = RenderApiClient::new(&config.render_api, config.poll.download_timeout_secs)?;
        let rasterizer = PdfiumRasterizer::new(
            config.dpi,
            config.jpeg_quality,
            config.pdfium_library_dir.clone(),
        );
        let notifier = SmtpNotifier::new(config.smtp.clone());
        Ok(Self::new(
            config,
            Arc::new(backend),
            Arc::new(rasterizer),
            Arc::new(notifier),
        ))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The render job for `recipient`, stamped with `timestamp`.
    pub fn render_options_for(&self, recipient: &Recipient, timestamp: i64) -> RenderOptions {
        RenderOptions {
            dashboard_id: self.config.dashboard_id.clone(),
            daterange: self.config.daterange,
            aggregation: self.config.aggregation,
            filters: recipient.filters.clone(),
            dashboard_ts: Some(timestamp),
        }
    }

    /// Deliver the dashboard to every recipient.
    ///
    /// # Errors
    /// Under the fail-fast policy, the first recipient failure. Under the
    /// continue policy only setup errors are returned; per-recipient failures
    /// are in the report (see [`DispatchReport::into_result`]).
    pub async fn run(&self) -> Result<DispatchReport, DashMailError> {
        let run_start = Instant::now();
        let total = self.config.recipients.len();
        let cb = self.config.progress_callback.as_ref();
        info!(
            "Dispatching dashboard {} to {} recipient(s)",
            self.config.dashboard_id, total
        );
        if let Some(cb) = cb {
            cb.on_run_start(total);
        }

        let mut deliveries: Vec<DeliveryResult> = Vec::with_capacity(total);
        for (i, recipient) in self.config.recipients.iter().enumerate() {
            let index = i + 1;
            if let Some(cb) = cb {
                cb.on_recipient_start(index, total, &recipient.email);
            }

            let started = Instant::now();
            let mut result = DeliveryResult::new(&recipient.email);
            let outcome = self.deliver(index, recipient, &mut result).await;
            result.duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => {
                    info!(
                        "Delivered to {} ({} pages, {}ms)",
                        recipient.email, result.pages, result.duration_ms
                    );
                    if let Some(cb) = cb {
                        cb.on_recipient_complete(index, total, &recipient.email, result.pages);
                    }
                }
                Err(e) => {
                    if let Some(cb) = cb {
                        cb.on_recipient_error(index, total, &recipient.email, &e.to_string());
                    }
                    match self.config.failure_policy {
                        FailurePolicy::FailFast => {
                            error!("Delivery to {} failed, stopping: {}", recipient.email, e);
                            if let Some(cb) = cb {
                                let delivered =
                                    deliveries.iter().filter(|d| d.error.is_none()).count();
                                cb.on_run_complete(index, delivered);
                            }
                            return Err(DashMailError::RecipientFailed {
                                recipient: recipient.email.clone(),
                                source: Box::new(e),
                            });
                        }
                        FailurePolicy::Continue => {
                            warn!("Delivery to {} failed, continuing: {}", recipient.email, e);
                            result.error = Some(RecipientError::from_fatal(&recipient.email, &e));
                        }
                    }
                }
            }
            deliveries.push(result);
        }

        let stats = summarise(&deliveries, total, run_start);
        info!(
            "Dispatch complete: {}/{} delivered, {}ms total",
            stats.delivered, stats.attempted, stats.total_duration_ms
        );
        if let Some(cb) = cb {
            cb.on_run_complete(stats.attempted, stats.delivered);
        }

        Ok(DispatchReport { deliveries, stats })
    }

    /// Run the whole pipeline for one recipient, filling `result` as each
    /// stage completes so a failure still reports how far it got.
    async fn deliver(
        &self,
        index: usize,
        recipient: &Recipient,
        result: &mut DeliveryResult,
    ) -> Result<(), DashMailError> {
        let scratch = self.scratch_dir()?;

        self.enter(index, recipient, Stage::RenderRequest);
        let options = self.render_options_for(recipient, chrono::Utc::now().timestamp());
        let url = self.backend.request_render(&options).await?;
        result.artifact_url = url.clone();

        self.enter(index, recipient, Stage::Poll);
        let pdf_path = scratch.path().join(PDF_FILE_NAME);
        let fetched =
            poll::fetch_artifact(self.backend.as_ref(), &url, &pdf_path, &self.config.poll).await?;
        result.poll_attempts = fetched.attempts;
        result.pdf_bytes = fetched.bytes;

        self.enter(index, recipient, Stage::Convert);
        let pages = self.rasterizer.rasterize(&fetched.path, scratch.path()).await?;
        let inline_image = pages
            .first()
            .cloned()
            .ok_or_else(|| DashMailError::EmptyDocument {
                path: fetched.path.clone(),
            })?;
        result.pages = pages.len();

        let mut attachments = vec![fetched.path.clone()];
        if self.config.email.attach_page_images {
            attachments.extend(pages.iter().cloned());
        }

        self.enter(index, recipient, Stage::Send);
        let email = OutgoingEmail {
            from: self.config.email.from.clone(),
            to: recipient.email.clone(),
            subject: self.config.email.subject.clone(),
            text: self.config.email.text.clone(),
            attachments,
            inline_image,
        };
        self.notifier.send(&email).await
    }

    fn enter(&self, index: usize, recipient: &Recipient, stage: Stage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(index, &recipient.email, stage);
        }
    }

    fn scratch_dir(&self) -> Result<TempDir, DashMailError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("dashmail-");
        match self.config.work_dir {
            Some(ref parent) => {
                std::fs::create_dir_all(parent).map_err(|e| DashMailError::io(parent, e))?;
                builder
                    .tempdir_in(parent)
                    .map_err(|e| DashMailError::io(parent, e))
            }
            None => builder
                .tempdir()
                .map_err(|e| DashMailError::io(std::env::temp_dir(), e)),
        }
    }
}

fn summarise(deliveries: &[DeliveryResult], total: usize, run_start: Instant) -> DispatchStats {
    let failed = deliveries.iter().filter(|d| d.error.is_some()).count();
    DispatchStats {
        total_recipients: total,
        attempted: deliveries.len(),
        delivered: deliveries.len() - failed,
        failed,
        total_poll_attempts: deliveries.iter().map(|d| d.poll_attempts as u64).sum(),
        total_pages: deliveries.iter().map(|d| d.pages).sum(),
        total_duration_ms: run_start.elapsed().as_millis() as u64,
    }
}

/// Deliver the dashboard to every configured recipient.
///
/// This is the primary entry point for the library: it wires the real render
/// API client, pdfium rasteriser and SMTP notifier from `config`.
///
/// ```rust,no_run
/// use dashmail::{dispatch, DispatchConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DispatchConfig::from_file("report.json")?
///     .secrets_from_env()
///     .build()?;
/// let report = dispatch(config).await?;
/// eprintln!("{} delivered", report.stats.delivered);
/// # Ok(())
/// # }
/// ```
pub async fn dispatch(config: DispatchConfig) -> Result<DispatchReport, DashMailError> {
    Dispatcher::from_config(config)?.run().await
}

/// Synchronous wrapper around [`dispatch`].
///
/// Creates a temporary tokio runtime internally.
pub fn dispatch_sync(config: DispatchConfig) -> Result<DispatchReport, DashMailError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DashMailError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(dispatch(config))
}
