//! Frame-set retrieval. The player only depends on [`FrameSource`]; the
//! archive implementation reads what the forecast backend writes to disk.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use nimbus_types::{
    catalog::{ForecastModel, FrameQuery},
    frame::{resolve_image_url, FrameDescriptor, FrameKey, FrameSet},
    NimbusError, Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn fetch_frame_set(&self, query: &FrameQuery) -> Result<FrameSet>;
    async fn base_times(&self, model: ForecastModel, variable: &str) -> Result<Vec<i64>>;
}

/// One entry of a frame list as served by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    /// `{base}_{valid}` in unix seconds.
    pub timestamp: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrameList {
    pub images: Vec<WireFrame>,
}

impl WireFrame {
    pub fn into_descriptor(self, image_base: Option<&str>) -> Result<FrameDescriptor> {
        let key: FrameKey = self.timestamp.parse()?;
        Ok(FrameDescriptor::new(
            key.base_time,
            key.valid_time,
            resolve_image_url(image_base, &self.url),
        ))
    }
}

pub fn parse_frame_list(json: &str, image_base: Option<&str>) -> Result<FrameSet> {
    let list: WireFrameList = serde_json::from_str(json)
        .map_err(|err| source_error(format!("malformed frame list: {err}")))?;
    let frames = list
        .images
        .into_iter()
        .map(|frame| frame.into_descriptor(image_base))
        .collect::<Result<Vec<_>>>()?;
    FrameSet::new(frames).map_err(|err| source_error(err.to_string()))
}

/// Key of an archived image named `{base}_{valid}_image.{ext}`.
pub fn parse_image_name(name: &str) -> Option<FrameKey> {
    let (stem, _ext) = name.rsplit_once('.')?;
    stem.strip_suffix("_image")?.parse().ok()
}

/// Reads `{root}/{model}/{variable}/`. A `{base}.json` manifest wins when
/// present; otherwise the directory's images for that base time are listed
/// in valid-time order.
pub struct ArchiveSource {
    root: PathBuf,
    image_base_url: Option<String>,
}

impl ArchiveSource {
    pub fn new(root: impl Into<PathBuf>, image_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            image_base_url,
        }
    }

    fn variable_dir(&self, model: ForecastModel, variable: &str) -> PathBuf {
        self.root.join(model.as_str()).join(variable)
    }

    async fn image_names(dir: &Path) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|err| source_error(format!("cannot list {}: {err}", dir.display())))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| source_error(format!("cannot list {}: {err}", dir.display())))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn scan(&self, query: &FrameQuery, dir: &Path) -> Result<FrameSet> {
        let mut keyed: Vec<(FrameKey, String)> = Self::image_names(dir)
            .await?
            .into_iter()
            .filter_map(|name| parse_image_name(&name).map(|key| (key, name)))
            .filter(|(key, _)| key.base_time == query.base_time)
            .collect();
        keyed.sort_by_key(|(key, _)| key.valid_time);

        let frames: Vec<FrameDescriptor> = keyed
            .into_iter()
            .map(|(key, name)| {
                let relative = format!("{}/{}/{}", query.model, query.variable, name);
                FrameDescriptor::new(
                    key.base_time,
                    key.valid_time,
                    resolve_image_url(self.image_base_url.as_deref(), &relative),
                )
            })
            .collect();
        FrameSet::new(frames)
            .map_err(|_| source_error(format!("no frames archived for {query}")))
    }
}

#[async_trait]
impl FrameSource for ArchiveSource {
    async fn fetch_frame_set(&self, query: &FrameQuery) -> Result<FrameSet> {
        let dir = self.variable_dir(query.model, &query.variable);
        let manifest = dir.join(format!("{}.json", query.base_time));
        let frames = match tokio::fs::read_to_string(&manifest).await {
            Ok(json) => {
                debug!("Reading frame manifest {}", manifest.display());
                parse_frame_list(&json, self.image_base_url.as_deref())?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.scan(query, &dir).await?
            }
            Err(err) => {
                return Err(source_error(format!(
                    "cannot read {}: {err}",
                    manifest.display()
                )))
            }
        };
        info!("Fetched {} frames for {query}", frames.len());
        Ok(frames)
    }

    async fn base_times(&self, model: ForecastModel, variable: &str) -> Result<Vec<i64>> {
        let dir = self.variable_dir(model, variable);
        let times: BTreeSet<i64> = Self::image_names(&dir)
            .await?
            .iter()
            .filter_map(|name| {
                name.strip_suffix(".json")
                    .and_then(|stem| stem.parse().ok())
                    .or_else(|| parse_image_name(name).map(|key| key.base_time))
            })
            .collect();
        Ok(times.into_iter().collect())
    }
}

pub fn source_error(message: impl Into<String>) -> NimbusError {
    NimbusError::FetchFailure(message.into())
}
