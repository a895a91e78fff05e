//! Image prefetch: per-URL load tracking, retry orchestration and the probe
//! abstraction used to check that an image can actually be decoded.

pub mod prefetch;
pub mod tracker;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nimbus_types::{NimbusError, Result};
use tracing::debug;

pub use prefetch::{PrefetchCoordinator, PrefetchEffect};
pub use tracker::{FailureDisposition, LoadOutcome, LoadRecord, LoadTracker};

/// Result of a single load attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Loaded,
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ProbeOutcome::Loaded)
    }
}

impl<T> From<Result<T>> for ProbeOutcome {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => ProbeOutcome::Loaded,
            Err(err) => ProbeOutcome::Failed(err.to_string()),
        }
    }
}

#[async_trait]
pub trait ImageProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// Probe that reads an image from disk and decodes it.
///
/// `file://` URLs and plain paths are supported; relative paths resolve
/// against `root`.
pub struct DecodeProbe {
    root: Option<PathBuf>,
}

impl DecodeProbe {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn resolve_path(&self, url: &str) -> Result<PathBuf> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(loader_error(format!(
                "remote image urls are not probed locally: {url}"
            )));
        }
        let raw = url.strip_prefix("file://").unwrap_or(url);
        let path = Path::new(raw);
        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        })
    }

    async fn decode(&self, url: &str) -> Result<(u32, u32)> {
        let path = self.resolve_path(url)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| loader_error(format!("failed to read {}: {err}", path.display())))?;
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|err| loader_error(format!("decode task aborted: {err}")))?
            .map_err(|err| loader_error(format!("failed to decode {}: {err}", path.display())))?;
        Ok((decoded.width(), decoded.height()))
    }
}

#[async_trait]
impl ImageProbe for DecodeProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let result = self.decode(url).await;
        if let Ok((width, height)) = &result {
            debug!("Decoded {url} ({width}x{height})");
        }
        result.into()
    }
}

pub fn loader_error(message: impl Into<String>) -> NimbusError {
    NimbusError::Probe(message.into())
}
