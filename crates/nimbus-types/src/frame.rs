use std::{collections::HashSet, fmt, str::FromStr};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::{NimbusError, Result};

/// Identity of a frame: the forecast base time and the valid time it predicts,
/// both as unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameKey {
    pub base_time: i64,
    pub valid_time: i64,
}

impl FrameKey {
    pub const fn new(base_time: i64, valid_time: i64) -> Self {
        Self {
            base_time,
            valid_time,
        }
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base_time, self.valid_time)
    }
}

impl FromStr for FrameKey {
    type Err = NimbusError;

    fn from_str(s: &str) -> Result<Self> {
        let (base, valid) = s
            .split_once('_')
            .ok_or_else(|| NimbusError::InvalidFrame(format!("malformed frame key '{s}'")))?;
        let parse = |part: &str| {
            part.trim().parse::<i64>().map_err(|err| {
                NimbusError::InvalidFrame(format!("malformed frame key '{s}': {err}"))
            })
        };
        Ok(Self::new(parse(base)?, parse(valid)?))
    }
}

/// One renderable forecast image. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    pub base_time: i64,
    pub valid_time: i64,
    pub image_url: String,
}

impl FrameDescriptor {
    pub fn new(base_time: i64, valid_time: i64, image_url: impl Into<String>) -> Self {
        Self {
            base_time,
            valid_time,
            image_url: image_url.into(),
        }
    }

    pub fn key(&self) -> FrameKey {
        FrameKey::new(self.base_time, self.valid_time)
    }

    /// Forecast lead time in whole hours.
    pub fn lead_hours(&self) -> i64 {
        (self.valid_time - self.base_time) / 3600
    }
}

/// Ordered, non-empty collection of frames. Index order is playback order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSet {
    frames: Vec<FrameDescriptor>,
}

impl FrameSet {
    pub fn new(frames: Vec<FrameDescriptor>) -> Result<Self> {
        if frames.is_empty() {
            return Err(NimbusError::InvalidFrame(
                "a frame set needs at least one frame".into(),
            ));
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&FrameDescriptor> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameDescriptor> {
        self.frames.iter()
    }

    pub fn position(&self, key: &FrameKey) -> Option<usize> {
        self.frames.iter().position(|frame| frame.key() == *key)
    }

    pub fn position_by_valid_time(&self, valid_time: i64) -> Option<usize> {
        self.frames
            .iter()
            .position(|frame| frame.valid_time == valid_time)
    }

    /// Distinct image URLs in first-appearance order.
    pub fn unique_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.frames
            .iter()
            .filter(|frame| seen.insert(frame.image_url.as_str()))
            .map(|frame| frame.image_url.clone())
            .collect()
    }
}

/// Join a possibly relative image URL onto the configured image base.
pub fn resolve_image_url(base: Option<&str>, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://") {
        return url.to_string();
    }
    let relative = url.trim_start_matches('/');
    match base {
        Some(base) if !base.is_empty() => {
            format!("{}/{}", base.trim_end_matches('/'), relative)
        }
        _ => url.to_string(),
    }
}

/// Render unix seconds as `YYYY-MM-DD HH:MM UTC`.
pub fn format_timestamp(seconds: i64) -> String {
    match DateTime::from_timestamp(seconds, 0) {
        Some(at) => at.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => format!("{seconds}s"),
    }
}

/// Human label for the playback counter, e.g. `Frame 3 of 12`.
pub fn frame_label(index: usize, total: usize) -> String {
    format!("Frame {} of {}", index + 1, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> FrameSet {
        FrameSet::new(vec![
            FrameDescriptor::new(100, 100, "a.webp"),
            FrameDescriptor::new(100, 200, "b.webp"),
            FrameDescriptor::new(100, 300, "a.webp"),
        ])
        .expect("non-empty set")
    }

    #[test]
    fn frame_key_round_trips_through_text() {
        let key = FrameKey::new(1578808800, 1579046400);
        assert_eq!(key.to_string(), "1578808800_1579046400");
        let parsed: FrameKey = "1578808800_1579046400".parse().expect("parse key");
        assert_eq!(parsed, key);
        assert!("1578808800".parse::<FrameKey>().is_err());
        assert!("abc_123".parse::<FrameKey>().is_err());
    }

    #[test]
    fn empty_frame_set_is_rejected() {
        assert!(FrameSet::new(Vec::new()).is_err());
    }

    #[test]
    fn lookups_by_key_and_valid_time() {
        let set = sample_set();
        assert_eq!(set.position(&FrameKey::new(100, 200)), Some(1));
        assert_eq!(set.position(&FrameKey::new(100, 999)), None);
        assert_eq!(set.position_by_valid_time(300), Some(2));
        assert_eq!(set.last_index(), 2);
    }

    #[test]
    fn unique_urls_keep_first_appearance_order() {
        assert_eq!(sample_set().unique_urls(), vec!["a.webp", "b.webp"]);
    }

    #[test]
    fn resolves_relative_urls_against_base() {
        assert_eq!(
            resolve_image_url(Some("http://host/streaming/"), "/cerrora/rain/1_2_image.webp"),
            "http://host/streaming/cerrora/rain/1_2_image.webp"
        );
        assert_eq!(
            resolve_image_url(Some("http://host"), "https://cdn/x.webp"),
            "https://cdn/x.webp"
        );
        assert_eq!(resolve_image_url(None, "/x.webp"), "/x.webp");
    }

    #[test]
    fn formats_labels() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00 UTC");
        assert_eq!(frame_label(2, 12), "Frame 3 of 12");
        assert_eq!(FrameDescriptor::new(0, 7200, "x").lead_hours(), 2);
    }
}
