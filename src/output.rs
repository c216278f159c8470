//! Result types returned by a dispatch run.

use crate::error::{DashMailError, RecipientError};
use serde::{Deserialize, Serialize};

/// Outcome of a full run over the recipient list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    /// One entry per attempted recipient, in configuration order.
    pub deliveries: Vec<DeliveryResult>,
    pub stats: DispatchStats,
}

impl DispatchReport {
    /// Recipients whose message was accepted by the relay.
    pub fn delivered(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.deliveries.iter().filter(|d| d.error.is_none())
    }

    /// Recipients whose pipeline failed.
    pub fn failed(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.deliveries.iter().filter(|d| d.error.is_some())
    }

    /// Treat any failed delivery as an error.
    pub fn into_result(self) -> Result<Self, DashMailError> {
        if self.stats.failed == 0 {
            Ok(self)
        } else {
            Err(DashMailError::PartialFailure {
                delivered: self.stats.delivered,
                failed: self.stats.failed,
                total: self.stats.attempted,
            })
        }
    }
}

/// What happened for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub email: String,

    /// URL the render API returned; empty if the request failed.
    pub artifact_url: String,

    /// Polls issued before the artifact was ready.
    pub poll_attempts: u32,

    /// Size of the downloaded PDF.
    pub pdf_bytes: u64,

    /// Pages rasterised into images.
    pub pages: usize,

    pub duration_ms: u64,

    /// `Some` when the recipient's pipeline failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecipientError>,
}

impl DeliveryResult {
    pub(crate) fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            artifact_url: String::new(),
            poll_attempts: 0,
            pdf_bytes: 0,
            pages: 0,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Recipients listed in the configuration.
    pub total_recipients: usize,
    /// Recipients whose pipeline was started.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub total_poll_attempts: u64,
    pub total_pages: usize,
    pub total_duration_ms: u64,
}
