use std::{collections::HashSet, time::Duration};

use nimbus_types::{
    config::{PrefetchConfig, TimeoutPolicy},
    events::PrefetchSummary,
    frame::FrameSet,
    NimbusError,
};
use tracing::{debug, info, warn};

use crate::{
    tracker::{FailureDisposition, LoadOutcome, LoadTracker},
    ProbeOutcome,
};

/// Work the coordinator asks its owner to carry out. The coordinator never
/// performs I/O or arms timers itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchEffect {
    /// Issue a load probe. `attempt` is 1-based.
    Probe { url: String, attempt: u32 },
    ScheduleRetry { url: String, delay: Duration },
    ArmTimeout { delay: Duration },
    ImageFailed { url: String, attempts: u32 },
    /// Every image resolved, or the safety timeout fired. Emitted once per set.
    Resolved { summary: PrefetchSummary },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Resolved,
}

pub struct PrefetchCoordinator {
    config: PrefetchConfig,
    tracker: LoadTracker,
    urls: Vec<String>,
    in_flight: HashSet<String>,
    awaiting_retry: HashSet<String>,
    processed: usize,
    success: usize,
    failed: usize,
    forced: usize,
    phase: Phase,
}

impl PrefetchCoordinator {
    pub fn new(config: PrefetchConfig) -> Self {
        let tracker = LoadTracker::new(config.max_retries);
        Self {
            config,
            tracker,
            urls: Vec::new(),
            in_flight: HashSet::new(),
            awaiting_retry: HashSet::new(),
            processed: 0,
            success: 0,
            failed: 0,
            forced: 0,
            phase: Phase::Idle,
        }
    }

    /// Drop every record and counter of the previous set.
    pub fn reset(&mut self) {
        self.tracker = LoadTracker::new(self.config.max_retries);
        self.urls.clear();
        self.in_flight.clear();
        self.awaiting_retry.clear();
        self.processed = 0;
        self.success = 0;
        self.failed = 0;
        self.forced = 0;
        self.phase = Phase::Idle;
    }

    pub fn begin(&mut self, frames: &FrameSet) -> Vec<PrefetchEffect> {
        self.reset();
        self.urls = frames.unique_urls();
        self.phase = Phase::Running;
        debug!(
            "Prefetching {} images for {} frames",
            self.urls.len(),
            frames.len()
        );

        let mut effects = Vec::with_capacity(self.urls.len() + 1);
        for url in &self.urls {
            self.tracker.record_attempt_start(url);
            self.in_flight.insert(url.clone());
            effects.push(PrefetchEffect::Probe {
                url: url.clone(),
                attempt: 1,
            });
        }
        effects.push(PrefetchEffect::ArmTimeout {
            delay: self.config.safety_timeout(),
        });
        effects
    }

    pub fn on_probe_result(&mut self, url: &str, outcome: &ProbeOutcome) -> Vec<PrefetchEffect> {
        if self.phase != Phase::Running {
            debug!("Ignoring probe result for {url}: prefetch not running");
            return Vec::new();
        }
        if !self.in_flight.remove(url) {
            debug!("Ignoring duplicate probe result for {url}");
            return Vec::new();
        }

        let mut effects = Vec::new();
        match outcome {
            ProbeOutcome::Loaded => {
                if self.tracker.record_success(url) {
                    self.processed += 1;
                    self.success += 1;
                }
            }
            ProbeOutcome::Failed(reason) => match self.tracker.record_failure(url) {
                FailureDisposition::Retry { attempts } => {
                    debug!("Image {url} failed (attempt {attempts}): {reason}; retrying");
                    self.awaiting_retry.insert(url.to_string());
                    effects.push(PrefetchEffect::ScheduleRetry {
                        url: url.to_string(),
                        delay: self.config.retry_delay(),
                    });
                }
                FailureDisposition::Exhausted { attempts } => {
                    self.processed += 1;
                    self.failed += 1;
                    effects.push(PrefetchEffect::ImageFailed {
                        url: url.to_string(),
                        attempts,
                    });
                }
                FailureDisposition::AlreadyResolved => {}
            },
        }

        if self.processed >= self.urls.len() {
            effects.push(self.finish());
        }
        effects
    }

    pub fn on_retry_due(&mut self, url: &str) -> Vec<PrefetchEffect> {
        if self.phase != Phase::Running
            || !self.awaiting_retry.remove(url)
            || self.tracker.is_resolved(url)
        {
            return Vec::new();
        }
        let attempt = self
            .tracker
            .record(url)
            .map(|record| record.attempts + 1)
            .unwrap_or(1);
        self.in_flight.insert(url.to_string());
        vec![PrefetchEffect::Probe {
            url: url.to_string(),
            attempt,
        }]
    }

    pub fn on_timeout(&mut self) -> Vec<PrefetchEffect> {
        if self.phase != Phase::Running {
            return Vec::new();
        }
        let forced_outcome = match self.config.timeout_policy {
            TimeoutPolicy::MarkLoaded => LoadOutcome::Loaded,
            TimeoutPolicy::MarkFailed => LoadOutcome::Failed,
        };
        for url in &self.urls {
            if self.tracker.force_resolve(url, forced_outcome) {
                self.processed += 1;
                self.forced += 1;
            }
        }
        if self.forced > 0 {
            let err = NimbusError::TimeoutForcedResolution {
                pending: self.forced,
            };
            warn!("{err}; resolving as {:?}", forced_outcome);
        }
        vec![self.finish()]
    }

    fn finish(&mut self) -> PrefetchEffect {
        self.phase = Phase::Resolved;
        self.in_flight.clear();
        self.awaiting_retry.clear();
        let summary = self.summary();
        info!(
            "Prefetch resolved: {} loaded, {} failed, {} forced of {}",
            summary.success_count, summary.failed_count, summary.forced_count, summary.total
        );
        PrefetchEffect::Resolved { summary }
    }

    /// True while the current set still has outstanding work.
    pub fn is_active(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_resolved(&self) -> bool {
        self.phase == Phase::Resolved
    }

    pub fn summary(&self) -> PrefetchSummary {
        PrefetchSummary {
            success_count: self.success,
            failed_count: self.failed,
            forced_count: self.forced,
            total: self.urls.len(),
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn tracker(&self) -> &LoadTracker {
        &self.tracker
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_types::frame::FrameDescriptor;

    fn frames(urls: &[&str]) -> FrameSet {
        FrameSet::new(
            urls.iter()
                .enumerate()
                .map(|(i, url)| FrameDescriptor::new(0, (i as i64 + 1) * 100, *url))
                .collect(),
        )
        .expect("non-empty")
    }

    fn failed() -> ProbeOutcome {
        ProbeOutcome::Failed("decode error".into())
    }

    fn resolved_summary(effects: &[PrefetchEffect]) -> Option<PrefetchSummary> {
        effects.iter().find_map(|effect| match effect {
            PrefetchEffect::Resolved { summary } => Some(*summary),
            _ => None,
        })
    }

    #[test]
    fn begin_probes_each_url_and_arms_timeout() {
        let mut coordinator = PrefetchCoordinator::new(PrefetchConfig::default());
        let effects = coordinator.begin(&frames(&["a", "b", "a"]));
        assert_eq!(
            effects,
            vec![
                PrefetchEffect::Probe {
                    url: "a".into(),
                    attempt: 1
                },
                PrefetchEffect::Probe {
                    url: "b".into(),
                    attempt: 1
                },
                PrefetchEffect::ArmTimeout {
                    delay: Duration::from_millis(5_000)
                },
            ]
        );
        assert!(coordinator.is_active());
        assert_eq!(coordinator.summary().total, 2);
    }

    #[test]
    fn resolves_once_when_all_images_processed() {
        let mut coordinator = PrefetchCoordinator::new(PrefetchConfig::default());
        coordinator.begin(&frames(&["a", "b"]));
        assert!(resolved_summary(&coordinator.on_probe_result("a", &ProbeOutcome::Loaded)).is_none());
        // Duplicate callback must not double count.
        assert!(coordinator.on_probe_result("a", &ProbeOutcome::Loaded).is_empty());
        let summary = resolved_summary(&coordinator.on_probe_result("b", &ProbeOutcome::Loaded))
            .expect("resolved");
        assert_eq!(summary.success_count, 2);
        assert_eq!(coordinator.processed(), 2);
        assert!(!coordinator.is_active());
        assert!(coordinator.on_timeout().is_empty());
    }

    #[test]
    fn failure_schedules_retry_until_exhausted() {
        let mut coordinator = PrefetchCoordinator::new(PrefetchConfig::default());
        coordinator.begin(&frames(&["a", "b"]));
        coordinator.on_probe_result("a", &ProbeOutcome::Loaded);

        for attempt in 2..=3 {
            let effects = coordinator.on_probe_result("b", &failed());
            assert_eq!(
                effects,
                vec![PrefetchEffect::ScheduleRetry {
                    url: "b".into(),
                    delay: Duration::from_millis(2_000)
                }]
            );
            assert_eq!(
                coordinator.on_retry_due("b"),
                vec![PrefetchEffect::Probe {
                    url: "b".into(),
                    attempt
                }]
            );
        }

        let effects = coordinator.on_probe_result("b", &failed());
        assert_eq!(
            effects[0],
            PrefetchEffect::ImageFailed {
                url: "b".into(),
                attempts: 3
            }
        );
        let summary = resolved_summary(&effects).expect("resolved");
        assert_eq!(
            (summary.success_count, summary.failed_count, summary.total),
            (1, 1, 2)
        );
        assert!(!coordinator.tracker().is_ready("b"));
    }

    #[test]
    fn retry_due_without_pending_retry_is_ignored() {
        let mut coordinator = PrefetchCoordinator::new(PrefetchConfig::default());
        coordinator.begin(&frames(&["a"]));
        assert!(coordinator.on_retry_due("a").is_empty());
        assert!(coordinator.on_retry_due("zzz").is_empty());
    }

    #[test]
    fn timeout_forces_pending_images_loaded() {
        let mut coordinator = PrefetchCoordinator::new(PrefetchConfig::default());
        coordinator.begin(&frames(&["a", "b", "c"]));
        coordinator.on_probe_result("a", &ProbeOutcome::Loaded);
        coordinator.on_probe_result("b", &ProbeOutcome::Loaded);

        let summary = resolved_summary(&coordinator.on_timeout()).expect("resolved");
        assert_eq!(summary.forced_count, 1);
        assert_eq!(summary.success_count, 2);
        assert!(coordinator.tracker().is_ready("c"));
        assert!(!coordinator.is_active());

        // A late result for the forced image changes nothing.
        assert!(coordinator.on_probe_result("c", &failed()).is_empty());
        assert!(coordinator.tracker().is_ready("c"));
        assert!(coordinator.on_timeout().is_empty());
    }

    #[test]
    fn timeout_can_mark_pending_images_failed() {
        let config = PrefetchConfig {
            timeout_policy: TimeoutPolicy::MarkFailed,
            ..PrefetchConfig::default()
        };
        let mut coordinator = PrefetchCoordinator::new(config);
        coordinator.begin(&frames(&["a"]));
        coordinator.on_timeout();
        assert!(!coordinator.tracker().is_ready("a"));
        assert!(coordinator.tracker().is_resolved("a"));
    }

    #[test]
    fn reset_discards_records() {
        let mut coordinator = PrefetchCoordinator::new(PrefetchConfig::default());
        coordinator.begin(&frames(&["a"]));
        coordinator.on_probe_result("a", &failed());
        coordinator.reset();
        assert!(coordinator.tracker().is_empty());
        assert!(!coordinator.is_active());
        assert!(coordinator.on_probe_result("a", &ProbeOutcome::Loaded).is_empty());
    }
}
