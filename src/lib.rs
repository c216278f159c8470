//! # dashmail
//!
//! Render an analytics dashboard to PDF through its render API, rasterise the
//! pages, and e-mail the result to a list of recipients, each with their own
//! dashboard filters.
//!
//! ## Pipeline Overview
//!
//! ```text
//! for each recipient (sequentially)
//!  │
//!  ├─ 1. Request    POST render job {dashboard, daterange, filters, ts} → artifact URL
//!  ├─ 2. Poll       wait for Content-Length ≥ threshold (bounded), download PDF
//!  ├─ 3. Rasterise  pdfium → 1.jpg, 2.jpg, … (spawn_blocking)
//!  └─ 4. Notify     HTML mail + inline page 1 + PDF attachment over STARTTLS SMTP
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dashmail::{dispatch, create_daterange, DispatchConfig, Filter, Recipient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key and SMTP password come from DASHMAIL_API_KEY / DASHMAIL_SMTP_PASSWORD.
//!     let config = DispatchConfig::builder()
//!         .dashboard_id(1234u64)
//!         .daterange(create_daterange("Jan 1st, 2018", "Jan 29, 2018")?)
//!         .site("acme")
//!         .sender("reporting@acme.com")
//!         .recipient(Recipient::new("user1@acme.com").filter(Filter::new("user_id", "300")))
//!         .secrets_from_env()
//!         .build()?;
//!     let report = dispatch(config).await?;
//!     eprintln!("{}/{} delivered", report.stats.delivered, report.stats.attempted);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dashmail` binary (clap + anyhow + tracing-subscriber) |
//!
//! pdfium is loaded at runtime: from `pdfium_library_dir` when configured,
//! else from `PDFIUM_LIB_PATH`, otherwise from the system library search path.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    DispatchConfig, DispatchConfigBuilder, EmailTemplate, FailurePolicy, PollConfig, Recipient,
    RenderApiConfig, SmtpConfig, SmtpSecurity,
};
pub use dispatch::{dispatch, dispatch_sync, Dispatcher};
pub use error::{DashMailError, RecipientError, Stage};
pub use options::{
    create_daterange, parse_date, Aggregation, DashboardId, DateRange, Filter, FilterValue,
    RenderOptions, Scalar,
};
pub use output::{DeliveryResult, DispatchReport, DispatchStats};
pub use pipeline::notify::{Notifier, OutgoingEmail, SmtpNotifier};
pub use pipeline::rasterize::{PageRasterizer, PdfiumRasterizer};
pub use pipeline::request::{RenderApiClient, RenderBackend};
pub use progress::{DispatchProgressCallback, NoopProgressCallback, ProgressCallback};
