use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    frame::{FrameDescriptor, FrameKey, FrameSet},
    NimbusError, Result,
};

/// Forecast producers available for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    Cerrora,
    Graphcast,
    GroundTruth,
}

impl ForecastModel {
    pub const ALL: [ForecastModel; 3] = [
        ForecastModel::Cerrora,
        ForecastModel::Graphcast,
        ForecastModel::GroundTruth,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ForecastModel::Cerrora => "cerrora",
            ForecastModel::Graphcast => "graphcast",
            ForecastModel::GroundTruth => "ground_truth",
        }
    }
}

impl Default for ForecastModel {
    fn default() -> Self {
        ForecastModel::Cerrora
    }
}

impl fmt::Display for ForecastModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForecastModel {
    type Err = NimbusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cerrora" => Ok(ForecastModel::Cerrora),
            "graphcast" => Ok(ForecastModel::Graphcast),
            "ground_truth" | "groundtruth" | "gt" => Ok(ForecastModel::GroundTruth),
            other => Err(NimbusError::Configuration(format!(
                "unknown forecast model '{other}'"
            ))),
        }
    }
}

/// Parameters of one frame-set fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameQuery {
    pub model: ForecastModel,
    pub variable: String,
    pub base_time: i64,
}

impl FrameQuery {
    pub fn new(model: ForecastModel, variable: impl Into<String>, base_time: i64) -> Self {
        Self {
            model,
            variable: variable.into(),
            base_time,
        }
    }
}

impl fmt::Display for FrameQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.model, self.variable, self.base_time)
    }
}

/// Frame sets for several models, aligned by frame key so the same instant
/// can be shown side by side.
#[derive(Debug, Clone, Default)]
pub struct ComparisonSet {
    tracks: BTreeMap<ForecastModel, FrameSet>,
}

impl ComparisonSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: ForecastModel, frames: FrameSet) -> Option<FrameSet> {
        self.tracks.insert(model, frames)
    }

    pub fn track(&self, model: ForecastModel) -> Option<&FrameSet> {
        self.tracks.get(&model)
    }

    pub fn models(&self) -> impl Iterator<Item = ForecastModel> + '_ {
        self.tracks.keys().copied()
    }

    /// The frame each track holds for `key`. Tracks without that instant are
    /// skipped.
    pub fn frames_at(&self, key: &FrameKey) -> Vec<(ForecastModel, &FrameDescriptor)> {
        self.tracks
            .iter()
            .filter_map(|(model, set)| {
                set.position(key)
                    .and_then(|index| set.get(index))
                    .map(|frame| (*model, frame))
            })
            .collect()
    }

    /// Same as [`frames_at`](Self::frames_at) but matches on valid time only;
    /// ground truth tracks carry their own base times.
    pub fn frames_valid_at(&self, valid_time: i64) -> Vec<(ForecastModel, &FrameDescriptor)> {
        self.tracks
            .iter()
            .filter_map(|(model, set)| {
                set.position_by_valid_time(valid_time)
                    .and_then(|index| set.get(index))
                    .map(|frame| (*model, frame))
            })
            .collect()
    }
}
