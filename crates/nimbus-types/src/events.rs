use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    catalog::FrameQuery,
    frame::{FrameDescriptor, FrameKey},
};

/// Aggregate outcome of prefetching one frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PrefetchSummary {
    pub success_count: usize,
    pub failed_count: usize,
    /// Images the safety timeout resolved while they were still pending.
    pub forced_count: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummaryVerdict {
    Ready,
    Degraded,
    Empty,
}

impl PrefetchSummary {
    pub fn verdict(&self) -> SummaryVerdict {
        if self.success_count > 0 && self.success_count > self.failed_count {
            SummaryVerdict::Ready
        } else if self.failed_count > 0 {
            SummaryVerdict::Degraded
        } else {
            SummaryVerdict::Empty
        }
    }

    pub fn timed_out(&self) -> bool {
        self.forced_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameChanged {
    pub key: FrameKey,
    pub index: usize,
    pub total: usize,
    pub frame: FrameDescriptor,
}

/// Notifications published by the player, one per logical change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerEvent {
    FrameChanged(FrameChanged),
    PrefetchSummary(PrefetchSummary),
    ImageFailed { url: String, attempts: u32 },
    SelectionError { reason: String },
    FetchFailed { query: FrameQuery, reason: String },
    PlaybackChanged { playing: bool },
    OverlayChanged { visible: bool },
    FrameSetCleared,
}

impl PlayerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlayerEvent::FrameChanged(_) | PlayerEvent::PlaybackChanged { .. } => {
                EventKind::Playback
            }
            PlayerEvent::PrefetchSummary(_)
            | PlayerEvent::ImageFailed { .. }
            | PlayerEvent::OverlayChanged { .. } => EventKind::Prefetch,
            PlayerEvent::SelectionError { .. }
            | PlayerEvent::FetchFailed { .. }
            | PlayerEvent::FrameSetCleared => EventKind::Selection,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Playback,
    Prefetch,
    Selection,
}

/// Immutable event envelope for the bus, telemetry and replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: PlayerEvent,
}

impl SystemEvent {
    pub fn new(payload: PlayerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: payload.kind(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_verdicts() {
        let ready = PrefetchSummary {
            success_count: 2,
            failed_count: 1,
            forced_count: 0,
            total: 3,
        };
        assert_eq!(ready.verdict(), SummaryVerdict::Ready);

        let degraded = PrefetchSummary {
            success_count: 1,
            failed_count: 2,
            ..ready
        };
        assert_eq!(degraded.verdict(), SummaryVerdict::Degraded);

        let forced_only = PrefetchSummary {
            success_count: 0,
            failed_count: 0,
            forced_count: 3,
            total: 3,
        };
        assert_eq!(forced_only.verdict(), SummaryVerdict::Empty);
        assert!(forced_only.timed_out());
    }

    #[test]
    fn envelope_carries_kind() {
        let event = SystemEvent::new(PlayerEvent::PlaybackChanged { playing: true });
        assert_eq!(event.kind, EventKind::Playback);
        let json = serde_json::to_string(&event).expect("serialize envelope");
        assert!(json.contains("PlaybackChanged"));
    }
}
