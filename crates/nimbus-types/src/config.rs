use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{catalog::ForecastModel, NimbusError, Result};

/// How the safety timeout resolves images that are still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Treat them as loaded so no overlay gets stuck.
    MarkLoaded,
    /// Treat them as permanently failed so the frame shows its fallback.
    MarkFailed,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        TimeoutPolicy::MarkLoaded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub safety_timeout_ms: u64,
    pub timeout_policy: TimeoutPolicy,
}

impl PrefetchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn safety_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_timeout_ms)
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 2_000,
            safety_timeout_ms: 5_000,
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub speed_ms: u64,
    pub min_speed_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed_ms: 500,
            min_speed_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub archive_dir: String,
    pub image_base_url: Option<String>,
    pub default_model: ForecastModel,
    pub default_variable: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            archive_dir: "streaming".into(),
            image_base_url: None,
            default_model: ForecastModel::default(),
            default_variable: "sea_level".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
    pub telemetry_dir: String,
    pub log_file: Option<String>,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            telemetry_dir: "telemetry".into(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NimbusConfig {
    pub prefetch: PrefetchConfig,
    pub playback: PlaybackConfig,
    pub source: SourceConfig,
    pub ops: OpsConfig,
}

impl NimbusConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            NimbusError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            NimbusError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch.max_retries == 0 {
            return Err(NimbusError::Configuration(
                "prefetch.max_retries must be greater than zero".into(),
            ));
        }
        if self.prefetch.safety_timeout_ms == 0 {
            return Err(NimbusError::Configuration(
                "prefetch.safety_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.playback.min_speed_ms == 0 {
            return Err(NimbusError::Configuration(
                "playback.min_speed_ms must be greater than zero".into(),
            ));
        }
        if self.playback.speed_ms < self.playback.min_speed_ms {
            return Err(NimbusError::Configuration(format!(
                "playback.speed_ms must be at least {}ms",
                self.playback.min_speed_ms
            )));
        }
        if self.source.default_variable.trim().is_empty() {
            return Err(NimbusError::Configuration(
                "source.default_variable must not be empty".into(),
            ));
        }
        Ok(())
    }
}
