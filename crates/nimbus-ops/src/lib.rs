//! Operational helpers: logging, telemetry capture and persistence.

use std::{
    fmt::Write,
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};

use chrono::Utc;
use nimbus_types::{
    config::OpsConfig,
    events::{PlayerEvent, PrefetchSummary, SystemEvent},
    NimbusError, Result,
};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| ops_error(format!("failed to create log filter: {err}")))?;

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| ops_error(format!("failed to open log file {path}: {err}")))?;
            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(StdMutex::new(file))
                .try_init()
        }
        None => fmt().with_env_filter(filter).try_init(),
    }
    .map_err(|err| ops_error(format!("tracing init error: {err}")))?;
    Ok(())
}

/// In-memory record of everything the player published.
#[derive(Clone, Default)]
pub struct TelemetryStore {
    events: Arc<Mutex<Vec<SystemEvent>>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_event(&self, event: SystemEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }

    pub async fn snapshot_events(&self) -> Vec<SystemEvent> {
        self.events.lock().await.clone()
    }

    pub async fn summaries(&self) -> Vec<PrefetchSummary> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event.payload {
                PlayerEvent::PrefetchSummary(summary) => Some(summary),
                _ => None,
            })
            .collect()
    }

    /// Write all recorded events as JSON lines into `dir`.
    pub async fn persist(&self, dir: &Path) -> Result<PathBuf> {
        let events = self.snapshot_events().await;
        let path = dir.join(format!(
            "session_{}.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        ));
        let mut lines = String::new();
        for event in &events {
            let line = serde_json::to_string(event)
                .map_err(|err| ops_error(format!("failed to encode event: {err}")))?;
            let _ = writeln!(lines, "{line}");
        }
        tokio::fs::write(&path, lines)
            .await
            .map_err(|err| ops_error(format!("failed to write {}: {err}", path.display())))?;
        info!("Persisted {} telemetry events to {:?}", events.len(), path);
        Ok(path)
    }
}

pub fn ensure_telemetry_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    std::fs::create_dir_all(&dir)
        .map_err(|err| ops_error(format!("failed to create telemetry dir: {err}")))?;
    info!("Telemetry directory ready at {:?}", dir);
    Ok(dir)
}

pub fn ops_error(message: impl Into<String>) -> NimbusError {
    NimbusError::Ops(message.into())
}
