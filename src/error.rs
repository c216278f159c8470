//! Error types for the dashmail library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DashMailError`]: **Fatal**: the stage that raised it cannot continue
//!   (render API rejected the request, artifact never became ready, PDF is
//!   corrupt, SMTP refused the message). Returned as `Err(DashMailError)`
//!   from every pipeline stage and from [`crate::dispatch::dispatch`] under
//!   the default fail-fast policy.
//!
//! * [`RecipientError`]: **Non-fatal**: one recipient's delivery failed but
//!   the run carried on because [`crate::config::FailurePolicy::Continue`]
//!   was selected. Stored inside [`crate::output::DeliveryResult`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the dashmail library.
#[derive(Debug, Error)]
pub enum DashMailError {
    // ── Render API errors ─────────────────────────────────────────────────
    /// The render API answered with a non-success status.
    #[error("Render request to '{endpoint}' was rejected with HTTP {status}: {body}")]
    RenderRejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The render API could not be reached, or its answer was unusable.
    #[error("Render request to '{endpoint}' failed: {reason}")]
    RenderRequestFailed { endpoint: String, reason: String },

    /// The render API answered 2xx but without a string `url` field.
    #[error("Render API response has no 'url' field: {body}")]
    MissingArtifactUrl { body: String },

    // ── Artifact errors ───────────────────────────────────────────────────
    /// The artifact stayed below the readiness threshold for too long.
    #[error("Artifact '{url}' was not ready after {attempts} polls ({elapsed_secs}s)\nIncrease poll.max_attempts or poll.deadline_secs.")]
    PollTimeout {
        url: String,
        attempts: u32,
        elapsed_secs: u64,
    },

    /// Probing or downloading the artifact failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease poll.download_timeout_secs.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The downloaded file is not a PDF.
    #[error("Downloaded file is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// pdfium could not parse the document.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// The document opened but has no pages to render.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A rendered page could not be written as JPEG.
    #[error("Failed to write page image '{path}': {detail}")]
    ImageWriteFailed { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium on the library search path, or set\n\
PDFIUM_LIB_PATH (config: pdfium_library_dir) to the library file or its directory.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Mail errors ───────────────────────────────────────────────────────
    /// An e-mail address could not be parsed.
    #[error("Invalid e-mail address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The MIME message could not be assembled.
    #[error("Failed to build message: {0}")]
    MessageBuildFailed(String),

    /// The SMTP relay refused the connection, the credentials or the message.
    #[error("SMTP send to '{recipient}' via {relay} failed: {reason}")]
    SendFailed {
        recipient: String,
        relay: String,
        reason: String,
    },

    // ── Date errors ───────────────────────────────────────────────────────
    /// A date string matched none of the accepted formats.
    #[error("Date '{input}' is not parseable. Enter one of the following formats 'YYYY-MM-DD', 'MM/DD/YYYY', 'MM/DD/YY', 'Jan 1st 2018' or 'YYYY-MM-DD HH:MM'")]
    InvalidDate { input: String },

    /// The range ends before it starts.
    #[error("Date range ends ({end}) before it starts ({start})")]
    InvalidDateRange { start: String, end: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Run-level errors ──────────────────────────────────────────────────
    /// A recipient's pipeline failed under the fail-fast policy.
    #[error("Delivery to '{recipient}' failed: {source}")]
    RecipientFailed {
        recipient: String,
        #[source]
        source: Box<DashMailError>,
    },

    /// Some recipients succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::DispatchReport::into_result`] when the
    /// caller wants to treat any failed delivery as an error.
    #[error("{failed}/{total} deliveries failed")]
    PartialFailure {
        delivered: usize,
        failed: usize,
        total: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Local file-system operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DashMailError {
    /// Which pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            DashMailError::RenderRejected { .. }
            | DashMailError::RenderRequestFailed { .. }
            | DashMailError::MissingArtifactUrl { .. } => Stage::RenderRequest,
            DashMailError::PollTimeout { .. } => Stage::Poll,
            DashMailError::DownloadFailed { .. }
            | DashMailError::DownloadTimeout { .. }
            | DashMailError::NotAPdf { .. } => Stage::Download,
            DashMailError::CorruptPdf { .. }
            | DashMailError::EmptyDocument { .. }
            | DashMailError::RasterisationFailed { .. }
            | DashMailError::ImageWriteFailed { .. }
            | DashMailError::PdfiumBindingFailed(_) => Stage::Convert,
            DashMailError::InvalidAddress { .. }
            | DashMailError::MessageBuildFailed(_)
            | DashMailError::SendFailed { .. } => Stage::Send,
            DashMailError::RecipientFailed { source, .. } => source.stage(),
            _ => Stage::Setup,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DashMailError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Pipeline stage in which a delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    RenderRequest,
    Poll,
    Download,
    Convert,
    Send,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Setup => "setup",
            Stage::RenderRequest => "render request",
            Stage::Poll => "poll",
            Stage::Download => "download",
            Stage::Convert => "convert",
            Stage::Send => "send",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single recipient.
///
/// Only produced under [`crate::config::FailurePolicy::Continue`]; the run
/// moves on to the next recipient.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{recipient}: {stage} failed: {detail}")]
pub struct RecipientError {
    pub recipient: String,
    pub stage: Stage,
    pub detail: String,
}

impl RecipientError {
    pub fn from_fatal(recipient: &str, err: &DashMailError) -> Self {
        Self {
            recipient: recipient.to_string(),
            stage: err.stage(),
            detail: err.to_string(),
        }
    }
}
