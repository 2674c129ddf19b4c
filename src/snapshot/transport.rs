//! Client-side snapshot transport.
//!
//! Fetches the persisted snapshot from its well-known location,
//! decompresses it as the bytes arrive, and hands the result to the engine
//! so the session resumes instead of booting from scratch.
//!
//! Errors are terminal for the session: a failed download or a corrupt
//! stream is reported to the caller (which surfaces it as a user-visible
//! status) and nothing is retried.

use anyhow::{bail, Context, Result};
use flate2::write::GzDecoder;
use futures_util::StreamExt;
use std::io::Write;

use crate::engine::{StateBlob, VmEngine};

/// Transfer progress reported to the embedding UI.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Compressed bytes received so far.
    pub downloaded: u64,
    /// Total compressed bytes, when the transport announced a length.
    pub total: Option<u64>,
    /// Short human-readable phase line.
    pub phase: String,
}

impl DownloadProgress {
    /// Percentage over compressed bytes, or None when the total is unknown
    /// and the UI should show an indeterminate indicator.
    pub fn percentage(&self) -> Option<u8> {
        let total = self.total?;
        if total == 0 {
            return Some(100);
        }
        Some(((self.downloaded * 100) / total).min(100) as u8)
    }
}

/// Progress callback type.
pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;

/// Streaming receiver: compressed chunks in arrival order on one side, the
/// decompressed snapshot out the other.
pub struct SnapshotReceiver<'a> {
    decoder: GzDecoder<Vec<u8>>,
    downloaded: u64,
    total: Option<u64>,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> SnapshotReceiver<'a> {
    pub fn new(total: Option<u64>, progress: Option<&'a ProgressCallback>) -> Self {
        Self {
            decoder: GzDecoder::new(Vec::new()),
            downloaded: 0,
            total,
            progress,
        }
    }

    /// Feed one compressed chunk through the streaming decoder.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.decoder
            .write_all(chunk)
            .context("decompressing snapshot stream")?;
        self.downloaded += chunk.len() as u64;
        self.report(&format!("Downloading... {}", format_bytes(self.downloaded)));
        Ok(())
    }

    /// Finish decompression and return the raw snapshot bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        self.decoder
            .finish()
            .context("finalizing snapshot decompression")
    }

    fn report(&self, phase: &str) {
        if let Some(cb) = self.progress {
            cb(DownloadProgress {
                downloaded: self.downloaded,
                total: self.total,
                phase: phase.to_string(),
            });
        }
    }
}

/// Fetch the persisted snapshot, decompressing as bytes arrive.
///
/// The content-length header, when present, drives percentage progress;
/// without it the callback still fires with an unknown total.
pub async fn fetch_state(url: &str, progress: Option<&ProgressCallback>) -> Result<Vec<u8>> {
    tracing::info!("fetching snapshot from {url}");

    let response = reqwest::get(url)
        .await
        .with_context(|| format!("requesting snapshot '{url}'"))?;
    if !response.status().is_success() {
        bail!(
            "snapshot download failed with status {} for '{url}'",
            response.status()
        );
    }

    let total = response.content_length();
    let mut receiver = SnapshotReceiver::new(total, progress);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("reading snapshot stream from '{url}'"))?;
        receiver.push(&chunk)?;
    }

    let bytes = receiver.finish()?;
    tracing::debug!("snapshot decompressed to {} bytes", bytes.len());
    Ok(bytes)
}

/// Restore a client session: download, rehydrate the engine, resume.
pub async fn restore_session<E: VmEngine>(
    engine: &mut E,
    url: &str,
    progress: Option<&ProgressCallback>,
) -> Result<()> {
    let bytes = fetch_state(url, progress).await?;
    resume_with(engine, bytes, progress)
}

/// Hand decompressed state to the engine and resume execution. Split from
/// the download so the rehydration path is exercisable without a network.
pub fn resume_with<E: VmEngine>(
    engine: &mut E,
    bytes: Vec<u8>,
    progress: Option<&ProgressCallback>,
) -> Result<()> {
    engine
        .restore_state(StateBlob::new(bytes))
        .context("restoring VM state")?;
    engine.run().context("resuming VM engine")?;
    if let Some(cb) = progress {
        cb(DownloadProgress {
            downloaded: 100,
            total: Some(100),
            phase: "Ready".to_string(),
        });
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
