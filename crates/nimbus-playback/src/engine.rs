use std::time::Duration;

use nimbus_types::config::PlaybackConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Paused,
    Playing,
}

/// Snapshot of the engine for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub current_index: usize,
    pub is_playing: bool,
    pub speed_ms: u64,
}

/// Speed selector steps offered by the player controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedPreset {
    X1,
    X2,
    X4,
    X8,
}

impl SpeedPreset {
    const ORDER: [SpeedPreset; 4] = [
        SpeedPreset::X1,
        SpeedPreset::X2,
        SpeedPreset::X4,
        SpeedPreset::X8,
    ];

    pub fn millis(self) -> u64 {
        match self {
            SpeedPreset::X1 => 1_000,
            SpeedPreset::X2 => 500,
            SpeedPreset::X4 => 250,
            SpeedPreset::X8 => 125,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpeedPreset::X1 => "1x",
            SpeedPreset::X2 => "2x",
            SpeedPreset::X4 => "4x",
            SpeedPreset::X8 => "8x",
        }
    }

    /// Preset whose interval is closest to `ms`.
    pub fn nearest(ms: u64) -> Self {
        Self::ORDER
            .into_iter()
            .min_by_key(|preset| preset.millis().abs_diff(ms))
            .unwrap_or(SpeedPreset::X2)
    }

    pub fn faster(self) -> Self {
        let idx = Self::ORDER.iter().position(|p| *p == self).unwrap_or(0);
        Self::ORDER[(idx + 1).min(Self::ORDER.len() - 1)]
    }

    pub fn slower(self) -> Self {
        let idx = Self::ORDER.iter().position(|p| *p == self).unwrap_or(0);
        Self::ORDER[idx.saturating_sub(1)]
    }
}

/// Frame index state machine. Time is passed in by the caller; the engine
/// never reads a clock or owns a timer.
///
/// While playing, the index advances by one whenever at least `speed` has
/// elapsed since the last advance (the baseline). Reaching the last frame
/// pauses playback; it never wraps.
#[derive(Debug, Clone)]
pub struct PlaybackEngine {
    len: usize,
    index: usize,
    status: PlaybackStatus,
    speed: Duration,
    min_speed: Duration,
    baseline: Option<Duration>,
}

impl PlaybackEngine {
    pub fn new(config: &PlaybackConfig) -> Self {
        let min_speed = Duration::from_millis(config.min_speed_ms.max(1));
        Self {
            len: 0,
            index: 0,
            status: PlaybackStatus::Paused,
            speed: Duration::from_millis(config.speed_ms).max(min_speed),
            min_speed,
            baseline: None,
        }
    }

    /// Seed for a new frame set: index 0, paused. Speed is preserved.
    pub fn reset(&mut self, len: usize) {
        self.len = len;
        self.index = 0;
        self.pause();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn speed(&self) -> Duration {
        self.speed
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            current_index: self.index,
            is_playing: self.is_playing(),
            speed_ms: self.speed.as_millis() as u64,
        }
    }

    fn last_index(&self) -> usize {
        self.len.saturating_sub(1)
    }

    /// Start autoplay. Returns the new index when playback restarts from the
    /// first frame. A set with fewer than two frames cannot play.
    pub fn play(&mut self, now: Duration) -> Option<usize> {
        if self.len < 2 || self.is_playing() {
            return None;
        }
        let restarted = if self.index == self.last_index() {
            self.index = 0;
            Some(0)
        } else {
            None
        };
        self.status = PlaybackStatus::Playing;
        self.baseline = Some(now);
        debug!("Playback started at index {}", self.index);
        restarted
    }

    pub fn pause(&mut self) {
        self.status = PlaybackStatus::Paused;
        self.baseline = None;
    }

    pub fn step_forward(&mut self) -> Option<usize> {
        let target = (self.index + 1).min(self.last_index());
        self.jump(target)
    }

    pub fn step_back(&mut self) -> Option<usize> {
        let target = self.index.saturating_sub(1);
        self.jump(target)
    }

    fn jump(&mut self, target: usize) -> Option<usize> {
        self.pause();
        if self.len == 0 || target == self.index {
            return None;
        }
        self.index = target;
        Some(target)
    }

    /// Clamp and move to `index`. Always reports the resulting index, even
    /// when it did not change, so the selection is republished.
    pub fn seek(&mut self, index: usize) -> Option<usize> {
        self.pause();
        if self.len == 0 {
            return None;
        }
        self.index = index.min(self.last_index());
        Some(self.index)
    }

    /// Change the inter-frame interval. Takes effect from the current
    /// baseline, without restarting playback. Returns the applied speed.
    pub fn set_speed(&mut self, speed_ms: u64) -> Duration {
        self.speed = Duration::from_millis(speed_ms).max(self.min_speed);
        self.speed
    }

    /// When the next advance is due, if playing.
    pub fn next_due(&self) -> Option<Duration> {
        if !self.is_playing() {
            return None;
        }
        self.baseline.map(|baseline| baseline + self.speed)
    }

    /// Advance at most one frame. Returns the new index when it moved.
    pub fn tick(&mut self, now: Duration) -> Option<usize> {
        if !self.is_playing() || self.len == 0 {
            return None;
        }
        let baseline = *self.baseline.get_or_insert(now);
        if now.saturating_sub(baseline) < self.speed {
            return None;
        }
        if self.index >= self.last_index() {
            self.pause();
            return None;
        }
        self.index += 1;
        self.baseline = Some(now);
        if self.index == self.last_index() {
            self.pause();
        }
        Some(self.index)
    }
}
