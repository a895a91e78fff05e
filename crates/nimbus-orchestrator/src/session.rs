use std::{collections::HashMap, time::Duration};

use nimbus_bus::{ObserverId, ObserverSet};
use nimbus_loader::{LoadRecord, PrefetchCoordinator, PrefetchEffect, ProbeOutcome};
use nimbus_playback::{Clock, PlaybackEngine, PlaybackState, TimerId, TimerQueue};
use nimbus_types::{
    catalog::FrameQuery,
    config::NimbusConfig,
    events::{FrameChanged, PlayerEvent, PrefetchSummary},
    frame::{FrameDescriptor, FrameKey, FrameSet},
    NimbusError, Result,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionTimer {
    PlaybackTick,
    Retry { generation: u64, url: String },
    SafetyTimeout { generation: u64 },
}

/// An image load the runtime should perform, tagged with the frame-set
/// generation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub generation: u64,
    pub url: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub playback: PlaybackState,
    pub total: usize,
    pub current: Option<FrameDescriptor>,
    pub analyzing: bool,
    pub overlay_visible: bool,
    pub frame_unavailable: bool,
    pub generation: u64,
    pub summary: Option<PrefetchSummary>,
}

/// Frame set, load records and playback state for one player, reconciled
/// against external selection requests.
///
/// Single-threaded and I/O free: image probes are handed out through
/// [`take_probe_requests`](Self::take_probe_requests) and their results fed
/// back with [`on_probe_result`](Self::on_probe_result); time only moves when
/// [`advance`](Self::advance) is called. Every mutation is tagged with a
/// generation so callbacks for a replaced frame set are ignored.
pub struct FrameSession<C: Clock> {
    clock: C,
    timers: TimerQueue<SessionTimer>,
    frames: Option<FrameSet>,
    generation: u64,
    prefetch: PrefetchCoordinator,
    playback: PlaybackEngine,
    playback_timer: Option<TimerId>,
    retry_timers: HashMap<String, TimerId>,
    timeout_timer: Option<TimerId>,
    probes: Vec<ProbeRequest>,
    observers: ObserverSet<PlayerEvent>,
    overlay_visible: bool,
    last_summary: Option<PrefetchSummary>,
}

impl<C: Clock> FrameSession<C> {
    pub fn new(config: &NimbusConfig, clock: C) -> Self {
        Self {
            clock,
            timers: TimerQueue::new(),
            frames: None,
            generation: 0,
            prefetch: PrefetchCoordinator::new(config.prefetch.clone()),
            playback: PlaybackEngine::new(&config.playback),
            playback_timer: None,
            retry_timers: HashMap::new(),
            timeout_timer: None,
            probes: Vec::new(),
            observers: ObserverSet::new(),
            overlay_visible: false,
            last_summary: None,
        }
    }

    pub fn subscribe<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&PlayerEvent) + Send + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn frame_set(&self) -> Option<&FrameSet> {
        self.frames.as_ref()
    }

    pub fn current_frame(&self) -> Option<&FrameDescriptor> {
        self.frames
            .as_ref()
            .and_then(|frames| frames.get(self.playback.current_index()))
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    /// True while prefetch for the current set has outstanding work.
    pub fn is_analyzing(&self) -> bool {
        self.prefetch.is_active()
    }

    pub fn load_record(&self, url: &str) -> Option<LoadRecord> {
        self.prefetch.tracker().record(url).copied()
    }

    pub fn is_ready(&self, url: &str) -> bool {
        self.prefetch.tracker().is_ready(url)
    }

    /// Spinner over the current frame: analyzing, or its image has not
    /// resolved yet. A permanently failed image shows its fallback instead.
    pub fn overlay_visible(&self) -> bool {
        match self.current_frame() {
            Some(frame) => {
                self.is_analyzing() || !self.prefetch.tracker().is_resolved(&frame.image_url)
            }
            None => false,
        }
    }

    /// The current frame's image failed for good (or was forced failed).
    pub fn frame_unavailable(&self) -> bool {
        self.current_frame()
            .map(|frame| {
                let tracker = self.prefetch.tracker();
                tracker.is_resolved(&frame.image_url) && !tracker.is_ready(&frame.image_url)
            })
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            playback: self.playback.state(),
            total: self.frames.as_ref().map(FrameSet::len).unwrap_or(0),
            current: self.current_frame().cloned(),
            analyzing: self.is_analyzing(),
            overlay_visible: self.overlay_visible(),
            frame_unavailable: self.frame_unavailable(),
            generation: self.generation,
            summary: self.last_summary,
        }
    }

    pub fn take_probe_requests(&mut self) -> Vec<ProbeRequest> {
        std::mem::take(&mut self.probes)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    // ---- selection bridge inputs -------------------------------------------

    pub fn on_new_frame_set(&mut self, frames: FrameSet) {
        let was_playing = self.playback.is_playing();
        self.retire_set();
        info!(
            "New frame set with {} frames (generation {})",
            frames.len(),
            self.generation
        );

        self.playback.reset(frames.len());
        let effects = self.prefetch.begin(&frames);
        self.frames = Some(frames);
        self.apply_transition(was_playing, Some(0));
        self.apply_effects(effects);
    }

    pub fn on_external_seek(&mut self, key: &FrameKey) -> Result<usize> {
        let index = self
            .frames
            .as_ref()
            .and_then(|frames| frames.position(key));
        self.seek_selection(index, key.to_string())
    }

    pub fn on_external_seek_valid_time(&mut self, valid_time: i64) -> Result<usize> {
        let index = self
            .frames
            .as_ref()
            .and_then(|frames| frames.position_by_valid_time(valid_time));
        self.seek_selection(index, format!("valid time {valid_time}"))
    }

    fn seek_selection(&mut self, index: Option<usize>, requested: String) -> Result<usize> {
        match index {
            Some(index) => {
                self.seek(index);
                Ok(index)
            }
            None => {
                let err = NimbusError::SelectionUnavailable(format!(
                    "{requested} is not in the current frame set"
                ));
                warn!("{err}");
                self.emit(PlayerEvent::SelectionError {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// The current set is obsolete; a new one will follow.
    pub fn on_model_or_variable_changed(&mut self) {
        let was_playing = self.playback.is_playing();
        self.retire_set();
        self.frames = None;
        self.playback.reset(0);
        self.last_summary = None;
        self.apply_transition(was_playing, None);
        self.emit(PlayerEvent::FrameSetCleared);
    }

    /// The previous frame set, if any, stays active.
    pub fn on_fetch_failed(&mut self, query: FrameQuery, err: &NimbusError) {
        error!("Frame set fetch for {query} failed: {err}");
        self.emit(PlayerEvent::FetchFailed {
            query,
            reason: err.to_string(),
        });
    }

    pub fn on_probe_result(&mut self, generation: u64, url: &str, outcome: ProbeOutcome) {
        if generation != self.generation {
            debug!("Dropping stale probe result for {url} (generation {generation})");
            return;
        }
        let effects = self.prefetch.on_probe_result(url, &outcome);
        self.apply_effects(effects);
    }

    /// Cancel everything and forget the current set.
    pub fn teardown(&mut self) {
        self.retire_set();
        self.frames = None;
        self.playback.reset(0);
        self.overlay_visible = false;
    }

    // ---- playback ----------------------------------------------------------

    pub fn play(&mut self) {
        let was_playing = self.playback.is_playing();
        let now = self.clock.now();
        let moved = self.playback.play(now);
        self.apply_transition(was_playing, moved);
    }

    pub fn pause(&mut self) {
        let was_playing = self.playback.is_playing();
        self.playback.pause();
        self.apply_transition(was_playing, None);
    }

    pub fn toggle(&mut self) {
        if self.playback.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn step_forward(&mut self) {
        let was_playing = self.playback.is_playing();
        let moved = self.playback.step_forward();
        self.apply_transition(was_playing, moved);
    }

    pub fn step_back(&mut self) {
        let was_playing = self.playback.is_playing();
        let moved = self.playback.step_back();
        self.apply_transition(was_playing, moved);
    }

    pub fn seek(&mut self, index: usize) {
        let was_playing = self.playback.is_playing();
        let moved = self.playback.seek(index);
        self.apply_transition(was_playing, moved);
    }

    pub fn set_speed(&mut self, speed_ms: u64) -> Duration {
        let applied = self.playback.set_speed(speed_ms);
        self.sync_playback_timer();
        applied
    }

    /// Fire every timer due at the clock's current time.
    pub fn advance(&mut self) {
        let now = self.clock.now();
        while let Some((_, timer)) = self.timers.pop_due(now) {
            match timer {
                SessionTimer::PlaybackTick => {
                    self.playback_timer = None;
                    let was_playing = self.playback.is_playing();
                    let moved = self.playback.tick(now);
                    self.apply_transition(was_playing, moved);
                }
                SessionTimer::Retry { generation, url } => {
                    if generation != self.generation {
                        continue;
                    }
                    self.retry_timers.remove(&url);
                    let effects = self.prefetch.on_retry_due(&url);
                    self.apply_effects(effects);
                }
                SessionTimer::SafetyTimeout { generation } => {
                    if generation != self.generation {
                        continue;
                    }
                    self.timeout_timer = None;
                    let effects = self.prefetch.on_timeout();
                    self.apply_effects(effects);
                }
            }
        }
    }

    // ---- internals ---------------------------------------------------------

    fn retire_set(&mut self) {
        self.timers.clear();
        self.playback_timer = None;
        self.retry_timers.clear();
        self.timeout_timer = None;
        self.probes.clear();
        self.prefetch.reset();
        self.last_summary = None;
        self.generation += 1;
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.observers.dispatch(&event);
    }

    fn emit_frame_changed(&mut self, index: usize) {
        let Some(frames) = &self.frames else {
            return;
        };
        let Some(frame) = frames.get(index) else {
            return;
        };
        let event = PlayerEvent::FrameChanged(FrameChanged {
            key: frame.key(),
            index,
            total: frames.len(),
            frame: frame.clone(),
        });
        self.emit(event);
    }

    /// Publish the consequences of a playback operation: frame first, then
    /// play state, then readiness.
    fn apply_transition(&mut self, was_playing: bool, moved: Option<usize>) {
        if let Some(index) = moved {
            self.emit_frame_changed(index);
        }
        let playing = self.playback.is_playing();
        if playing != was_playing {
            self.emit(PlayerEvent::PlaybackChanged { playing });
        }
        self.sync_playback_timer();
        self.refresh_overlay();
    }

    fn sync_playback_timer(&mut self) {
        if let Some(id) = self.playback_timer.take() {
            self.timers.cancel(id);
        }
        if let Some(due) = self.playback.next_due() {
            self.playback_timer = Some(self.timers.schedule(due, SessionTimer::PlaybackTick));
        }
    }

    fn refresh_overlay(&mut self) {
        let visible = self.overlay_visible();
        if visible != self.overlay_visible {
            self.overlay_visible = visible;
            self.emit(PlayerEvent::OverlayChanged { visible });
        }
    }

    fn apply_effects(&mut self, effects: Vec<PrefetchEffect>) {
        let now = self.clock.now();
        for effect in effects {
            match effect {
                PrefetchEffect::Probe { url, attempt } => {
                    self.probes.push(ProbeRequest {
                        generation: self.generation,
                        url,
                        attempt,
                    });
                }
                PrefetchEffect::ScheduleRetry { url, delay } => {
                    let id = self.timers.schedule(
                        now + delay,
                        SessionTimer::Retry {
                            generation: self.generation,
                            url: url.clone(),
                        },
                    );
                    if let Some(previous) = self.retry_timers.insert(url, id) {
                        self.timers.cancel(previous);
                    }
                }
                PrefetchEffect::ArmTimeout { delay } => {
                    if let Some(previous) = self.timeout_timer.take() {
                        self.timers.cancel(previous);
                    }
                    self.timeout_timer = Some(self.timers.schedule(
                        now + delay,
                        SessionTimer::SafetyTimeout {
                            generation: self.generation,
                        },
                    ));
                }
                PrefetchEffect::ImageFailed { url, attempts } => {
                    let err = NimbusError::ImageLoadFailure {
                        url: url.clone(),
                        attempts,
                    };
                    warn!("{err}");
                    self.emit(PlayerEvent::ImageFailed { url, attempts });
                }
                PrefetchEffect::Resolved { summary } => {
                    if let Some(id) = self.timeout_timer.take() {
                        self.timers.cancel(id);
                    }
                    for (_, id) in self.retry_timers.drain() {
                        self.timers.cancel(id);
                    }
                    self.last_summary = Some(summary);
                    self.emit(PlayerEvent::PrefetchSummary(summary));
                }
            }
        }
        self.refresh_overlay();
    }
}
