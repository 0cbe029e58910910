//! Streaming bundle downloads with progress and cancellation
//!
//! The downloader performs a single cancellable fetch of a byte stream to a
//! local destination. It never retries internally; retry is a caller
//! decision driven by a fresh install request.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Progress update emitted while a bundle is being written
#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    /// Bytes written to the destination so far
    pub bytes_written: u64,
    /// Expected total, when the server reports a content length
    pub bytes_expected: Option<u64>,
}

/// Performs cancellable, progress-reporting fetches
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    /// Create a downloader with the given per-request timeout
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Stream `url` to `dest`, reporting progress on `progress`
    ///
    /// Progress sends are non-blocking so they never stall the transport.
    /// On cancellation or any failure the destination file is removed, so
    /// no partial file is visible to callers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token fires, [`Error::Network`]
    /// for transport failures or non-success statuses, and
    /// [`Error::Filesystem`] when the destination cannot be written
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        progress: mpsc::UnboundedSender<DownloadProgress>,
    ) -> Result<()> {
        debug!(url, dest = %dest.display(), "starting download");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HTTP {} for {url}",
                response.status()
            )));
        }

        let bytes_expected = response.content_length();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Filesystem(format!("failed to create {}: {e}", parent.display())))?;
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::Filesystem(format!("failed to create {}: {e}", dest.display())))?;

        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    drop(file);
                    Self::discard(dest).await;
                    return Err(Error::Cancelled);
                }
                chunk = stream.next() => {
                    match chunk {
                        None => break,
                        Some(Ok(bytes)) => {
                            if let Err(e) = file.write_all(&bytes).await {
                                drop(file);
                                Self::discard(dest).await;
                                return Err(Error::Filesystem(format!(
                                    "failed to write {}: {e}",
                                    dest.display()
                                )));
                            }
                            bytes_written += bytes.len() as u64;
                            let _ = progress.send(DownloadProgress {
                                bytes_written,
                                bytes_expected,
                            });
                        }
                        Some(Err(e)) => {
                            drop(file);
                            Self::discard(dest).await;
                            return Err(Error::Network(format!("stream interrupted: {e}")));
                        }
                    }
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| Error::Filesystem(format!("failed to flush {}: {e}", dest.display())))?;

        debug!(bytes_written, dest = %dest.display(), "download complete");
        Ok(())
    }

    /// Fetch a small text resource (companion metadata)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] for transport failures or non-success
    /// statuses
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HTTP {} for {url}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read response: {e}")))
    }

    /// Best-effort removal of a partial destination file
    async fn discard(dest: &Path) {
        if let Err(e) = tokio::fs::remove_file(dest).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %dest.display(),
                    error = %e,
                    "failed to remove partial download"
                );
            }
        }
    }
}
