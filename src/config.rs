//! Configuration types for a dashboard dispatch run.
//!
//! Every knob lives in [`DispatchConfig`], built via its
//! [`DispatchConfigBuilder`] or loaded from a JSON file with
//! [`DispatchConfig::from_file`]. Secrets (the render API key and the SMTP
//! password) are never read from the file; they come from the environment
//! through [`DispatchConfigBuilder::secrets_from_env`] or from explicit
//! builder calls.
//!
//! ```json
//! {
//!   "dashboard_id": 1234,
//!   "daterange": {"start": "Jan 1st, 2018", "end": "Jan 29, 2018"},
//!   "render_api": {"site": "acme"},
//!   "smtp": {"host": "smtp.gmail.com", "username": "reports@acme.com"},
//!   "email": {"from": "reporting@acme.com"},
//!   "recipients": [
//!     {"email": "user1@acme.com", "filters": [{"name": "user_id", "value": "300"}]}
//!   ]
//! }
//! ```

use crate::error::DashMailError;
use crate::options::{create_daterange, Aggregation, DashboardId, DateRange, Filter};
use crate::progress::ProgressCallback;
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable holding the render API key.
pub const API_KEY_ENV: &str = "DASHMAIL_API_KEY";

/// Environment variable holding the SMTP password.
pub const SMTP_PASSWORD_ENV: &str = "DASHMAIL_SMTP_PASSWORD";

/// Configuration for one dispatch run over all recipients.
///
/// Built via [`DispatchConfig::builder()`].
///
/// # Example
/// ```rust
/// use dashmail::{DispatchConfig, Recipient};
///
/// let config = DispatchConfig::builder()
///     .dashboard_id(1234u64)
///     .site("acme")
///     .api_key("secret")
///     .sender("reporting@acme.com")
///     .recipient(Recipient::new("user1@acme.com"))
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 50);
/// ```
#[derive(Clone)]
pub struct DispatchConfig {
    /// Dashboard to render.
    pub dashboard_id: DashboardId,

    /// Optional date range applied to every render.
    pub daterange: Option<DateRange>,

    /// Optional aggregation applied to every render.
    pub aggregation: Option<Aggregation>,

    pub render_api: RenderApiConfig,

    pub poll: PollConfig,

    pub smtp: SmtpConfig,

    pub email: EmailTemplate,

    /// Rasterisation DPI for page images. Range: 10–600. Default: 50.
    ///
    /// Page images are only previews inside the e-mail body; the PDF is
    /// attached at full fidelity.
    pub dpi: u32,

    /// JPEG quality for page images. Range: 1–100. Default: 85.
    pub jpeg_quality: u8,

    /// Directory containing libpdfium. `None` uses the system search path.
    pub pdfium_library_dir: Option<PathBuf>,

    /// Parent directory for per-recipient scratch directories.
    /// `None` uses the OS temp directory.
    pub work_dir: Option<PathBuf>,

    /// What to do when one recipient's pipeline fails. Default: fail fast.
    pub failure_policy: FailurePolicy,

    /// Who receives the dashboard, and with which filters.
    pub recipients: Vec<Recipient>,

    /// Optional per-recipient progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dashboard_id: DashboardId::Named(String::new()),
            daterange: None,
            aggregation: None,
            render_api: RenderApiConfig::default(),
            poll: PollConfig::default(),
            smtp: SmtpConfig::default(),
            email: EmailTemplate::default(),
            dpi: 50,
            jpeg_quality: 85,
            pdfium_library_dir: None,
            work_dir: None,
            failure_policy: FailurePolicy::default(),
            recipients: Vec::new(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DispatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchConfig")
            .field("dashboard_id", &self.dashboard_id)
            .field("daterange", &self.daterange)
            .field("aggregation", &self.aggregation)
            .field("render_api", &self.render_api)
            .field("poll", &self.poll)
            .field("smtp", &self.smtp)
            .field("email", &self.email)
            .field("dpi", &self.dpi)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("pdfium_library_dir", &self.pdfium_library_dir)
            .field("work_dir", &self.work_dir)
            .field("failure_policy", &self.failure_policy)
            .field("recipients", &self.recipients)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn DispatchProgressCallback>"),
            )
            .finish()
    }
}

impl DispatchConfig {
    /// Create a new builder for `DispatchConfig`.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a JSON configuration file into a builder.
    ///
    /// The returned builder still lacks secrets; chain
    /// [`DispatchConfigBuilder::secrets_from_env`] before `build()`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<DispatchConfigBuilder, DashMailError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| DashMailError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file: ConfigFile =
            serde_json::from_str(&raw).map_err(|e| DashMailError::ConfigLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        file.into_builder()
    }

    /// Host and port string used in logs and errors.
    pub fn relay(&self) -> String {
        format!("{}:{}", self.smtp.host, self.smtp.port)
    }
}

// ── Sections ─────────────────────────────────────────────────────────────

/// Where and how to reach the render API.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderApiConfig {
    /// Base URL; `/api/v1/screenshot_requests` is appended.
    pub base_url: String,

    /// Site name, the first half of the partner-auth header.
    pub site: String,

    /// API key, the second half of the partner-auth header. Never serialised.
    #[serde(skip)]
    pub api_key: String,

    /// Timeout for the render request itself, in seconds. Default: 30.
    pub request_timeout_secs: u64,
}

impl Default for RenderApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.periscopedata.com".to_string(),
            site: String::new(),
            api_key: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for RenderApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderApiConfig")
            .field("base_url", &self.base_url)
            .field("site", &self.site)
            .field("api_key", &redact(&self.api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Readiness polling for the rendered artifact.
///
/// The render service answers artifact URLs with a short "screenshot not
/// ready" placeholder until the PDF is built, so readiness is detected by the
/// reported `Content-Length` reaching `ready_threshold_bytes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Minimum `Content-Length` that counts as ready. Default: 100.
    pub ready_threshold_bytes: u64,

    /// Pause between polls in milliseconds. Default: 1000.
    pub interval_ms: u64,

    /// Maximum number of polls before giving up. Default: 600.
    pub max_attempts: u32,

    /// Wall-clock limit for the whole wait, in seconds. Default: 900.
    pub deadline_secs: u64,

    /// Timeout for each probe and for the final download. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            ready_threshold_bytes: 100,
            interval_ms: 1000,
            max_attempts: 600,
            deadline_secs: 900,
            download_timeout_secs: 120,
        }
    }
}

/// Transport security towards the SMTP relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (default; port 587).
    #[default]
    StartTls,
    /// Implicit TLS from the first byte (port 465).
    Tls,
    /// No encryption. Only for local relays and test servers.
    None,
}

/// SMTP relay settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,

    /// Login name. Empty disables authentication.
    pub username: String,

    /// Never serialised.
    #[serde(skip)]
    pub password: String,

    /// Connect/command timeout in seconds. Default: 60.
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            security: SmtpSecurity::default(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 60,
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Sender, subject and body text of every outgoing message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailTemplate {
    pub from: String,
    pub subject: String,

    /// Sentence placed in the HTML body above the inline dashboard image.
    pub text: String,

    /// Also attach every page image next to the PDF. Default: false.
    pub attach_page_images: bool,
}

impl Default for EmailTemplate {
    fn default() -> Self {
        Self {
            from: String::new(),
            subject: "Updated Dashboard".to_string(),
            text: "here is your dashboard.".to_string(),
            attach_page_images: false,
        }
    }
}

/// One addressee and the filters applied to their render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Behaviour when a recipient's pipeline fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run on the first failure; remaining recipients are skipped.
    #[default]
    FailFast,
    /// Record the failure and continue with the next recipient.
    Continue,
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`DispatchConfig`].
#[derive(Debug)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    pub fn dashboard_id(mut self, id: impl Into<DashboardId>) -> Self {
        self.config.dashboard_id = id.into();
        self
    }

    pub fn daterange(mut self, range: DateRange) -> Self {
        self.config.daterange = Some(range);
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.config.aggregation = Some(aggregation);
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.render_api.base_url = url.into();
        self
    }

    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.config.render_api.site = site.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.render_api.api_key = key.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_api.request_timeout_secs = secs.max(1);
        self
    }

    pub fn poll(mut self, poll: PollConfig) -> Self {
        self.config.poll = poll;
        self
    }

    pub fn smtp(mut self, smtp: SmtpConfig) -> Self {
        let password = std::mem::take(&mut self.config.smtp.password);
        self.config.smtp = smtp;
        if self.config.smtp.password.is_empty() {
            self.config.smtp.password = password;
        }
        self
    }

    pub fn smtp_password(mut self, password: impl Into<String>) -> Self {
        self.config.smtp.password = password.into();
        self
    }

    pub fn email(mut self, template: EmailTemplate) -> Self {
        self.config.email = template;
        self
    }

    pub fn sender(mut self, from: impl Into<String>) -> Self {
        self.config.email.from = from.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.config.email.subject = subject.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(10, 600);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn pdfium_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_dir = Some(dir.into());
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn recipient(mut self, recipient: Recipient) -> Self {
        self.config.recipients.push(recipient);
        self
    }

    pub fn recipients(mut self, recipients: Vec<Recipient>) -> Self {
        self.config.recipients = recipients;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Fill unset secrets from [`API_KEY_ENV`] and [`SMTP_PASSWORD_ENV`].
    pub fn secrets_from_env(mut self) -> Self {
        if self.config.render_api.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                self.config.render_api.api_key = key;
            }
        }
        if self.config.smtp.password.is_empty() {
            if let Ok(password) = std::env::var(SMTP_PASSWORD_ENV) {
                self.config.smtp.password = password;
            }
        }
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DispatchConfig, DashMailError> {
        let c = &self.config;
        if c.dashboard_id == DashboardId::Named(String::new()) {
            return Err(DashMailError::InvalidConfig(
                "dashboard_id is required".into(),
            ));
        }
        if c.render_api.site.is_empty() {
            return Err(DashMailError::InvalidConfig(
                "render_api.site is required".into(),
            ));
        }
        if c.render_api.api_key.is_empty() {
            return Err(DashMailError::InvalidConfig(format!(
                "render API key is missing; set {API_KEY_ENV}"
            )));
        }
        if !c.smtp.username.is_empty() && c.smtp.password.is_empty() {
            return Err(DashMailError::InvalidConfig(format!(
                "SMTP password is missing for user '{}'; set {SMTP_PASSWORD_ENV}",
                c.smtp.username
            )));
        }
        if c.poll.max_attempts == 0 {
            return Err(DashMailError::InvalidConfig(
                "poll.max_attempts must be ≥ 1".into(),
            ));
        }
        if c.recipients.is_empty() {
            return Err(DashMailError::InvalidConfig(
                "at least one recipient is required".into(),
            ));
        }
        parse_mailbox(&c.email.from)?;
        for r in &c.recipients {
            parse_mailbox(&r.email)?;
        }
        Ok(self.config)
    }
}

/// Parse an address into a lettre [`Mailbox`].
pub fn parse_mailbox(address: &str) -> Result<Mailbox, DashMailError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| DashMailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

// ── File format ──────────────────────────────────────────────────────────

/// On-disk shape of the configuration; dates are human strings here.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    dashboard_id: DashboardId,
    #[serde(default)]
    daterange: Option<RawDateRange>,
    #[serde(default)]
    aggregation: Option<Aggregation>,
    #[serde(default)]
    render_api: RenderApiConfig,
    #[serde(default)]
    poll: PollConfig,
    #[serde(default)]
    smtp: SmtpConfig,
    #[serde(default)]
    email: EmailTemplate,
    #[serde(default)]
    dpi: Option<u32>,
    #[serde(default)]
    jpeg_quality: Option<u8>,
    #[serde(default)]
    pdfium_library_dir: Option<PathBuf>,
    #[serde(default)]
    work_dir: Option<PathBuf>,
    #[serde(default)]
    failure_policy: FailurePolicy,
    recipients: Vec<Recipient>,
}

#[derive(Debug, Deserialize)]
struct RawDateRange {
    start: String,
    end: String,
}

impl ConfigFile {
    fn into_builder(self) -> Result<DispatchConfigBuilder, DashMailError> {
        let mut builder = DispatchConfig::builder()
            .dashboard_id(self.dashboard_id)
            .base_url(self.render_api.base_url)
            .site(self.render_api.site)
            .request_timeout_secs(self.render_api.request_timeout_secs)
            .poll(self.poll)
            .smtp(self.smtp)
            .email(self.email)
            .failure_policy(self.failure_policy)
            .recipients(self.recipients);

        if let Some(range) = self.daterange {
            builder = builder.daterange(create_daterange(&range.start, &range.end)?);
        }
        if let Some(aggregation) = self.aggregation {
            builder = builder.aggregation(aggregation);
        }
        if let Some(dpi) = self.dpi {
            builder = builder.dpi(dpi);
        }
        if let Some(quality) = self.jpeg_quality {
            builder = builder.jpeg_quality(quality);
        }
        if let Some(dir) = self.pdfium_library_dir {
            builder = builder.pdfium_library_dir(dir);
        }
        if let Some(dir) = self.work_dir {
            builder = builder.work_dir(dir);
        }
        Ok(builder)
    }
}
