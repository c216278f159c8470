//! Notification: compose the dashboard e-mail and send it over SMTP.
//!
//! ## Message layout
//!
//! ```text
//! multipart/mixed
//! ├── multipart/related
//! │   ├── text/html      body referencing cid:image1
//! │   └── image/jpeg     inline, Content-ID <image1>
//! └── attachment per file (the PDF, optionally the page images)
//! ```
//!
//! Each call opens its own SMTP connection and drops it afterwards; nothing
//! is pooled across recipients.

use crate::config::{parse_mailbox, SmtpConfig, SmtpSecurity};
use crate::error::DashMailError;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Content-ID of the inline dashboard image referenced by the HTML body.
pub const INLINE_IMAGE_CID: &str = "image1";

/// Everything needed to build one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Sentence placed in the HTML body.
    pub text: String,
    /// Files attached under their base file names.
    pub attachments: Vec<PathBuf>,
    /// Image shown inline in the body.
    pub inline_image: PathBuf,
}

/// Delivers a composed dashboard e-mail to its single recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DashMailError>;
}

/// HTML body with the inline image reference.
pub fn html_body(text: &str) -> String {
    format!(
        "<b>Hi, </b> {}<br><img src=\"cid:{}\"><br>Thanks!",
        escape_html(text),
        INLINE_IMAGE_CID
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// MIME type for an attachment, from its extension.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn content_type_for(path: &Path) -> Result<ContentType, DashMailError> {
    ContentType::parse(mime_for(path)).map_err(|e| DashMailError::MessageBuildFailed(e.to_string()))
}

async fn read_part(path: &Path) -> Result<Vec<u8>, DashMailError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| DashMailError::io(path, e))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string())
}

/// Build the MIME message for `email`, reading every referenced file.
pub async fn compose_message(email: &OutgoingEmail) -> Result<Message, DashMailError> {
    let from = parse_mailbox(&email.from)?;
    let to = parse_mailbox(&email.to)?;

    let inline_bytes = read_part(&email.inline_image).await?;
    let inline = Attachment::new_inline(INLINE_IMAGE_CID.to_string())
        .body(inline_bytes, content_type_for(&email.inline_image)?);

    let related = MultiPart::related()
        .singlepart(SinglePart::html(html_body(&email.text)))
        .singlepart(inline);

    let mut mixed = MultiPart::mixed().multipart(related);
    for path in &email.attachments {
        let bytes = read_part(path).await?;
        debug!("Attaching {} ({} bytes)", path.display(), bytes.len());
        mixed = mixed.singlepart(Attachment::new(base_name(path)).body(bytes, content_type_for(path)?));
    }

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.as_str())
        .date_now()
        .multipart(mixed)
        .map_err(|e| DashMailError::MessageBuildFailed(e.to_string()))
}

/// [`Notifier`] that talks to an SMTP relay with lettre.
#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn relay(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn transport(&self, recipient: &str) -> Result<AsyncSmtpTransport<Tokio1Executor>, DashMailError> {
        let c = &self.config;
        let builder = match c.security {
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&c.host),
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&c.host),
            SmtpSecurity::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &c.host,
            )),
        }
        .map_err(|e| DashMailError::SendFailed {
            recipient: recipient.to_string(),
            relay: self.relay(),
            reason: e.to_string(),
        })?;

        let mut builder = builder
            .port(c.port)
            .timeout(Some(Duration::from_secs(c.timeout_secs)));
        if !c.username.is_empty() {
            builder = builder.credentials(Credentials::new(c.username.clone(), c.password.clone()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DashMailError> {
        let message = compose_message(email).await?;
        let transport = self.transport(&email.to)?;

        info!("Sending dashboard to {} via {}", email.to, self.relay());
        transport
            .send(message)
            .await
            .map_err(|e| DashMailError::SendFailed {
                recipient: email.to.clone(),
                relay: self.relay(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(dir: &Path) -> OutgoingEmail {
        let pdf = dir.join("dashboard.pdf");
        let jpg = dir.join("1.jpg");
        std::fs::write(&pdf, b"%PDF-1.4 fake").unwrap();
        std::fs::write(&jpg, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        OutgoingEmail {
            from: "reporting@acme.com".into(),
            to: "user1@acme.com".into(),
            subject: "Updated Dashboard".into(),
            text: "here is your dashboard.".into(),
            attachments: vec![pdf],
            inline_image: jpg,
        }
    }

    #[test]
    fn html_references_inline_image() {
        let html = html_body("numbers <up> & to the right");
        assert!(html.contains("cid:image1"));
        assert!(html.contains("&lt;up&gt; &amp;"));
    }

    #[test]
    fn quotes_in_body_text_are_escaped() {
        let html = html_body("here's the \"weekly\" view");
        assert!(html.contains("here&#39;s the &quot;weekly&quot; view"));
        assert!(!html.contains("here's"));
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(mime_for(Path::new("a.PDF")), "application/pdf");
        assert_eq!(mime_for(Path::new("1.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("chart.png")), "image/png");
        assert_eq!(mime_for(Path::new("blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn composed_message_has_html_inline_and_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let email = fixture(dir.path());
        let raw = String::from_utf8(compose_message(&email).await.unwrap().formatted()).unwrap();

        assert!(raw.contains("To: user1@acme.com"));
        assert!(raw.contains("Subject: Updated Dashboard"));
        assert_eq!(raw.matches("Content-Type: text/html").count(), 1);
        assert_eq!(raw.matches("Content-ID: <image1>").count(), 1);
        assert_eq!(raw.matches("Content-Disposition: attachment").count(), 1);
        assert!(raw.contains("filename=\"dashboard.pdf\""));
        assert!(raw.contains("multipart/related"));
    }

    #[tokio::test]
    async fn every_listed_file_is_attached() {
        let dir = tempfile::tempdir().unwrap();
        let mut email = fixture(dir.path());
        let page2 = dir.path().join("2.jpg");
        std::fs::write(&page2, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        email.attachments.push(email.inline_image.clone());
        email.attachments.push(page2);

        let raw = String::from_utf8(compose_message(&email).await.unwrap().formatted()).unwrap();
        assert_eq!(raw.matches("Content-Disposition: attachment").count(), 3);
        assert!(raw.contains("filename=\"2.jpg\""));
    }

    #[tokio::test]
    async fn malformed_recipient_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut email = fixture(dir.path());
        email.to = "nobody".into();
        assert!(matches!(
            compose_message(&email).await,
            Err(DashMailError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn missing_attachment_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut email = fixture(dir.path());
        email.attachments = vec![dir.path().join("gone.pdf")];
        assert!(matches!(
            compose_message(&email).await,
            Err(DashMailError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_a_send_failure() {
        let dir = tempfile::tempdir().unwrap();
        let email = fixture(dir.path());
        let notifier = SmtpNotifier::new(SmtpConfig {
            host: "127.0.0.1".into(),
            port: 1,
            security: SmtpSecurity::None,
            timeout_secs: 2,
            ..SmtpConfig::default()
        });
        match notifier.send(&email).await {
            Err(DashMailError::SendFailed { recipient, .. }) => {
                assert_eq!(recipient, "user1@acme.com")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
