//! Render API client: submit a render job, probe and fetch its artifact.
//!
//! The render service is asynchronous on its side. A POST to
//! `/api/v1/screenshot_requests` returns immediately with the URL the PDF
//! will eventually be served from; until the PDF is built that URL answers
//! with a short placeholder body. [`RenderBackend`] captures the three calls
//! the pipeline makes, so the poll loop and the dispatcher can be exercised
//! against scripted backends.

use crate::config::RenderApiConfig;
use crate::error::DashMailError;
use crate::options::RenderOptions;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Path appended to the configured base URL.
pub const SCREENSHOT_REQUESTS_PATH: &str = "/api/v1/screenshot_requests";

/// Header carrying `{site}:{api_key}` (`HTTP-X-PARTNER-AUTH`; names are
/// case-insensitive and travel lowercased).
pub const PARTNER_AUTH_HEADER: &str = "http-x-partner-auth";

/// The remote side of steps 1 and 2 of the pipeline.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Submit a render job and return the artifact URL.
    async fn request_render(&self, options: &RenderOptions) -> Result<String, DashMailError>;

    /// Reported `Content-Length` of the artifact, without reading its body.
    async fn content_length(&self, artifact_url: &str) -> Result<Option<u64>, DashMailError>;

    /// Download the artifact into `dest`, truncating it. Returns bytes written.
    async fn download(&self, artifact_url: &str, dest: &Path) -> Result<u64, DashMailError>;
}

/// [`RenderBackend`] over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct RenderApiClient {
    endpoint: String,
    auth: String,
    api: reqwest::Client,
    artifacts: reqwest::Client,
    download_timeout_secs: u64,
}

impl RenderApiClient {
    pub fn new(config: &RenderApiConfig, download_timeout_secs: u64) -> Result<Self, DashMailError> {
        let endpoint = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            SCREENSHOT_REQUESTS_PATH
        );
        let build_err = |e: reqwest::Error| DashMailError::Internal(format!("HTTP client: {e}"));

        let api = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(build_err)?;
        let artifacts = reqwest::Client::builder()
            .timeout(Duration::from_secs(download_timeout_secs))
            .build()
            .map_err(build_err)?;

        Ok(Self {
            endpoint,
            auth: format!("{}:{}", config.site, config.api_key),
            api,
            artifacts,
            download_timeout_secs,
        })
    }

    /// Full URL render jobs are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> Result<HeaderMap, DashMailError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&self.auth).map_err(|_| {
            DashMailError::InvalidConfig(
                "render API site or key contains characters not allowed in a header".into(),
            )
        })?;
        headers.insert(HeaderName::from_static(PARTNER_AUTH_HEADER), auth);
        Ok(headers)
    }

    fn download_error(&self, url: &str, e: reqwest::Error) -> DashMailError {
        if e.is_timeout() {
            DashMailError::DownloadTimeout {
                url: url.to_string(),
                secs: self.download_timeout_secs,
            }
        } else {
            DashMailError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl RenderBackend for RenderApiClient {
    async fn request_render(&self, options: &RenderOptions) -> Result<String, DashMailError> {
        let body = options.to_request_body()?;
        debug!(
            "POST {} {}",
            self.endpoint,
            String::from_utf8_lossy(&body)
        );

        let response = self
            .api
            .post(&self.endpoint)
            .headers(self.headers()?)
            .body(body)
            .send()
            .await
            .map_err(|e| DashMailError::RenderRequestFailed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DashMailError::RenderRequestFailed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(DashMailError::RenderRejected {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body: text,
            });
        }

        let url = extract_artifact_url(&text)?;
        info!("Render job accepted, artifact at {}", url);
        Ok(url)
    }

    async fn content_length(&self, artifact_url: &str) -> Result<Option<u64>, DashMailError> {
        // The body is never read; dropping the response closes the stream.
        let response = self
            .artifacts
            .get(artifact_url)
            .send()
            .await
            .map_err(|e| self.download_error(artifact_url, e))?;
        Ok(response.content_length())
    }

    async fn download(&self, artifact_url: &str, dest: &Path) -> Result<u64, DashMailError> {
        let mut response = self
            .artifacts
            .get(artifact_url)
            .send()
            .await
            .map_err(|e| self.download_error(artifact_url, e))?;

        if !response.status().is_success() {
            return Err(DashMailError::DownloadFailed {
                url: artifact_url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| DashMailError::io(dest, e))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.download_error(artifact_url, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| DashMailError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| DashMailError::io(dest, e))?;

        Ok(written)
    }
}

/// Pull the `url` string out of a render API response body.
pub fn extract_artifact_url(body: &str) -> Result<String, DashMailError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|_| DashMailError::MissingArtifactUrl {
            body: body.to_string(),
        })?;
    value
        .get("url")
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DashMailError::MissingArtifactUrl {
            body: body.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_url_field() {
        let url =
            extract_artifact_url(r#"{"url": "https://cdn.example.com/x.pdf", "id": 9}"#).unwrap();
        assert_eq!(url, "https://cdn.example.com/x.pdf");
    }

    #[test]
    fn missing_or_non_string_url_is_an_error() {
        for body in [r#"{"id": 9}"#, r#"{"url": 3}"#, r#"{"url": ""}"#, "not json"] {
            assert!(
                matches!(
                    extract_artifact_url(body),
                    Err(DashMailError::MissingArtifactUrl { .. })
                ),
                "body: {body}"
            );
        }
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = RenderApiConfig {
            base_url: "https://render.example.com/".into(),
            site: "acme".into(),
            api_key: "k".into(),
            ..RenderApiConfig::default()
        };
        let client = RenderApiClient::new(&config, 5).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://render.example.com/api/v1/screenshot_requests"
        );
        let headers = client.headers().unwrap();
        assert_eq!(headers[PARTNER_AUTH_HEADER], "acme:k");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }
}
