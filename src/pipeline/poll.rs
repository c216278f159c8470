//! Readiness polling and download of the rendered artifact.
//!
//! The artifact URL answers with a tiny placeholder until the PDF is built,
//! so readiness is judged by `Content-Length` alone. The wait is bounded by
//! both an attempt count and a wall-clock deadline; exhausting either is a
//! [`DashMailError::PollTimeout`].

use crate::config::PollConfig;
use crate::error::DashMailError;
use crate::pipeline::request::RenderBackend;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A downloaded artifact on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub bytes: u64,
    /// Polls issued, including the one that saw the artifact ready.
    pub attempts: u32,
}

/// Poll `url` until it reports at least `ready_threshold_bytes`.
///
/// A missing `Content-Length` counts as not ready. Returns the number of
/// polls issued.
pub async fn wait_until_ready(
    backend: &dyn RenderBackend,
    url: &str,
    poll: &PollConfig,
) -> Result<u32, DashMailError> {
    let started = Instant::now();
    let interval = Duration::from_millis(poll.interval_ms);
    let deadline = Duration::from_secs(poll.deadline_secs);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let length = backend.content_length(url).await?;
        debug!("Poll {} for {}: content-length {:?}", attempts, url, length);

        if matches!(length, Some(n) if n >= poll.ready_threshold_bytes) {
            return Ok(attempts);
        }

        if attempts >= poll.max_attempts || started.elapsed() + interval > deadline {
            return Err(DashMailError::PollTimeout {
                url: url.to_string(),
                attempts,
                elapsed_secs: started.elapsed().as_secs(),
            });
        }

        tokio::time::sleep(interval).await;
    }
}

/// Wait for the artifact, then download it to `dest`.
///
/// `dest` is truncated. A failed or non-PDF download leaves no file behind.
pub async fn fetch_artifact(
    backend: &dyn RenderBackend,
    url: &str,
    dest: &Path,
    poll: &PollConfig,
) -> Result<FetchedArtifact, DashMailError> {
    let attempts = wait_until_ready(backend, url, poll).await?;
    info!("Artifact ready after {} poll(s), downloading", attempts);

    let bytes = match backend.download(url, dest).await {
        Ok(n) => n,
        Err(e) => {
            discard(dest).await;
            return Err(e);
        }
    };

    if let Err(e) = check_pdf_magic(dest).await {
        discard(dest).await;
        return Err(e);
    }

    info!("Downloaded {} bytes to {}", bytes, dest.display());
    Ok(FetchedArtifact {
        path: dest.to_path_buf(),
        bytes,
        attempts,
    })
}

async fn check_pdf_magic(path: &Path) -> Result<(), DashMailError> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DashMailError::io(path, e))?;
    let mut magic = Vec::with_capacity(4);
    (&mut file)
        .take(4)
        .read_to_end(&mut magic)
        .await
        .map_err(|e| DashMailError::io(path, e))?;

    if magic != b"%PDF" {
        return Err(DashMailError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial download {}: {}", path.display(), e);
        }
    }
}
