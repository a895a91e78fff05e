use thiserror::Error;

pub type Result<T, E = NimbusError> = std::result::Result<T, E>;

/// Unified error type covering the failure modes of the player.
///
/// Nothing here is fatal to a running session: every variant maps to a
/// degraded-but-functional state at the frame or frame-set boundary.
#[derive(Debug, Error)]
pub enum NimbusError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("frame set fetch failed: {0}")]
    FetchFailure(String),
    #[error("image {url} failed to load after {attempts} attempts")]
    ImageLoadFailure { url: String, attempts: u32 },
    #[error("image probe error: {0}")]
    Probe(String),
    #[error("selection unavailable: {0}")]
    SelectionUnavailable(String),
    #[error("prefetch timed out with {pending} images still pending")]
    TimeoutForcedResolution { pending: usize },
    #[error("invalid frame data: {0}")]
    InvalidFrame(String),
    #[error("orchestrator error: {0}")]
    Orchestrator(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
