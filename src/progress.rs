//! Progress-callback trait for per-recipient dispatch events.
//!
//! Inject an [`Arc<dyn DispatchProgressCallback>`] via
//! [`crate::config::DispatchConfigBuilder::progress_callback`] to follow a run
//! as it walks the recipient list. The CLI uses it to drive a terminal
//! progress bar; library callers can forward events to logs or a database.
//!
//! # Example
//!
//! ```rust
//! use dashmail::{DispatchConfig, DispatchProgressCallback, Recipient};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     delivered: AtomicUsize,
//! }
//!
//! impl DispatchProgressCallback for CountingCallback {
//!     fn on_recipient_complete(&self, index: usize, total: usize, email: &str, pages: usize) {
//!         self.delivered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{index}/{total} {email}: {pages} pages");
//!     }
//! }
//!
//! let config = DispatchConfig::builder()
//!     .dashboard_id(1u64)
//!     .site("acme")
//!     .api_key("k")
//!     .sender("reports@acme.com")
//!     .recipient(Recipient::new("ops@acme.com"))
//!     .progress_callback(Arc::new(CountingCallback { delivered: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use std::sync::Arc;

/// Called by the dispatcher as it processes each recipient.
///
/// Recipients are processed sequentially, so events for one recipient never
/// interleave with another's. All methods default to no-ops.
/// `index` is 1-based.
pub trait DispatchProgressCallback: Send + Sync {
    /// Called once before the first recipient.
    fn on_run_start(&self, total_recipients: usize) {
        let _ = total_recipients;
    }

    /// Called before the render request for a recipient is sent.
    fn on_recipient_start(&self, index: usize, total: usize, email: &str) {
        let _ = (index, total, email);
    }

    /// Called when a recipient's pipeline enters a new stage.
    fn on_stage(&self, index: usize, email: &str, stage: Stage) {
        let _ = (index, email, stage);
    }

    /// Called after the message for a recipient was accepted by the relay.
    ///
    /// `pages` is the number of rasterised pages.
    fn on_recipient_complete(&self, index: usize, total: usize, email: &str, pages: usize) {
        let _ = (index, total, email, pages);
    }

    /// Called when a recipient's pipeline fails.
    fn on_recipient_error(&self, index: usize, total: usize, email: &str, error: &str) {
        let _ = (index, total, email, error);
    }

    /// Called once after the last attempted recipient.
    ///
    /// Under the fail-fast policy `attempted` may be lower than the
    /// configured recipient count.
    fn on_run_complete(&self, attempted: usize, delivered: usize) {
        let _ = (attempted, delivered);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DispatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DispatchConfig`].
pub type ProgressCallback = Arc<dyn DispatchProgressCallback>;
