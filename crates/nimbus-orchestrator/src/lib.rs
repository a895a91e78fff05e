//! Player runtime: drives a [`FrameSession`] on tokio, running image probes
//! and frame-set fetches concurrently and publishing every session event to
//! the bus and telemetry.

pub mod session;

use std::{future::pending, sync::Arc};

use futures::{future::BoxFuture, stream::FuturesUnordered, StreamExt};
use nimbus_bus::EventBus;
use nimbus_loader::{ImageProbe, ProbeOutcome};
use nimbus_ops::TelemetryStore;
use nimbus_playback::TokioClock;
use nimbus_source::FrameSource;
use nimbus_types::{
    catalog::FrameQuery,
    config::NimbusConfig,
    events::{PlayerEvent, SystemEvent},
    frame::{FrameKey, FrameSet},
    state::{Action, AppState, StateChange},
    NimbusError, Result,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info};

pub use session::{FrameSession, ProbeRequest, SessionSnapshot};

const COMMAND_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum Command {
    /// Fetch a frame set; the current one stays active until it arrives.
    Load(FrameQuery),
    Replace(FrameSet),
    Seek(FrameKey),
    SeekValidTime(i64),
    SeekIndex(usize),
    Play,
    Pause,
    TogglePlay,
    StepForward,
    StepBack,
    SetSpeed(u64),
    Dispatch(Action),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    State(oneshot::Sender<AppState>),
    Shutdown,
}

/// Cloneable control surface for a running player.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<Command>,
}

impl PlayerHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| orchestrator_error("player task has stopped"))
    }

    /// For callers outside the runtime, such as the terminal UI thread.
    pub fn blocking_send(&self, command: Command) -> Result<()> {
        self.tx
            .blocking_send(command)
            .map_err(|_| orchestrator_error("player task has stopped"))
    }

    pub async fn load(&self, query: FrameQuery) -> Result<()> {
        self.send(Command::Load(query)).await
    }

    pub async fn replace(&self, frames: FrameSet) -> Result<()> {
        self.send(Command::Replace(frames)).await
    }

    pub async fn seek(&self, key: FrameKey) -> Result<()> {
        self.send(Command::Seek(key)).await
    }

    pub async fn seek_index(&self, index: usize) -> Result<()> {
        self.send(Command::SeekIndex(index)).await
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn set_speed(&self, speed_ms: u64) -> Result<()> {
        self.send(Command::SetSpeed(speed_ms)).await
    }

    pub async fn dispatch(&self, action: Action) -> Result<()> {
        self.send(Command::Dispatch(action)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await
            .map_err(|_| orchestrator_error("player task dropped snapshot request"))
    }

    pub async fn app_state(&self) -> Result<AppState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::State(reply)).await?;
        rx.await
            .map_err(|_| orchestrator_error("player task dropped state request"))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

struct ProbeCompletion {
    generation: u64,
    url: String,
    outcome: ProbeOutcome,
}

struct FetchCompletion {
    token: u64,
    query: FrameQuery,
    result: Result<FrameSet>,
}

pub struct Orchestrator<S, P, B>
where
    S: FrameSource,
    P: ImageProbe,
    B: EventBus,
{
    source: Arc<S>,
    probe: Arc<P>,
    bus: B,
    telemetry: TelemetryStore,
    session: FrameSession<TokioClock>,
    state: AppState,
    events: mpsc::UnboundedReceiver<PlayerEvent>,
    fetch_token: u64,
}

impl<S, P, B> Orchestrator<S, P, B>
where
    S: FrameSource + 'static,
    P: ImageProbe + 'static,
    B: EventBus + 'static,
{
    pub fn new(
        config: &NimbusConfig,
        source: S,
        probe: P,
        bus: B,
        telemetry: TelemetryStore,
    ) -> Self {
        let mut session = FrameSession::new(config, TokioClock::new());
        let (tx, events) = mpsc::unbounded_channel();
        session.subscribe(move |event: &PlayerEvent| {
            let _ = tx.send(event.clone());
        });
        let state = AppState::new(
            config.source.default_model,
            config.source.default_variable.clone(),
        );
        Self {
            source: Arc::new(source),
            probe: Arc::new(probe),
            bus,
            telemetry,
            session,
            state,
            events,
            fetch_token: 0,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn spawn(self) -> (PlayerHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (PlayerHandle { tx }, task)
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        let mut probes: FuturesUnordered<BoxFuture<'static, ProbeCompletion>> =
            FuturesUnordered::new();
        let mut fetch: Option<BoxFuture<'static, FetchCompletion>> = None;
        info!("Player session started");

        loop {
            for request in self.session.take_probe_requests() {
                probes.push(self.probe_task(request));
            }
            self.flush_events().await?;

            let deadline = self
                .session
                .next_deadline()
                .map(|at| self.session.clock().instant_at(at));

            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => {
                        if let Some(next) = self.handle(command) {
                            // Dropping the previous future abandons the older fetch.
                            fetch = Some(next);
                        }
                    }
                },
                Some(done) = probes.next(), if !probes.is_empty() => {
                    self.session.on_probe_result(done.generation, &done.url, done.outcome);
                }
                done = wait_fetch(&mut fetch) => {
                    fetch = None;
                    self.on_fetch_complete(done);
                }
                _ = wait_until(deadline) => {
                    self.session.advance();
                }
            }
        }

        self.session.teardown();
        self.flush_events().await?;
        info!("Player session stopped");
        Ok(())
    }

    fn handle(&mut self, command: Command) -> Option<BoxFuture<'static, FetchCompletion>> {
        match command {
            Command::Load(query) => return self.dispatch(Action::SelectQuery(query)),
            Command::Replace(frames) => {
                self.supersede_fetch();
                self.session.on_new_frame_set(frames);
            }
            Command::Seek(key) => {
                if let Err(err) = self.session.on_external_seek(&key) {
                    debug!("Seek rejected: {err}");
                }
            }
            Command::SeekValidTime(valid_time) => {
                if let Err(err) = self.session.on_external_seek_valid_time(valid_time) {
                    debug!("Seek rejected: {err}");
                }
            }
            Command::SeekIndex(index) => self.session.seek(index),
            Command::Play => self.session.play(),
            Command::Pause => self.session.pause(),
            Command::TogglePlay => self.session.toggle(),
            Command::StepForward => self.session.step_forward(),
            Command::StepBack => self.session.step_back(),
            Command::SetSpeed(speed_ms) => {
                let applied = self.session.set_speed(speed_ms);
                debug!("Playback speed set to {applied:?}");
            }
            Command::Dispatch(action) => return self.dispatch(action),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::State(reply) => {
                let _ = reply.send(self.state.clone());
            }
            Command::Shutdown => {}
        }
        None
    }

    fn dispatch(&mut self, action: Action) -> Option<BoxFuture<'static, FetchCompletion>> {
        match self.state.apply(action) {
            StateChange::Unchanged | StateChange::Loading(_) => None,
            StateChange::SourceChanged(query) => {
                // Whatever is in flight belongs to the discarded source.
                self.supersede_fetch();
                self.session.on_model_or_variable_changed();
                query.map(|query| self.start_fetch(query))
            }
            StateChange::BaseTimeChanged(query) => Some(self.start_fetch(query)),
            StateChange::SeekValidTime(valid_time) => {
                if let Err(err) = self.session.on_external_seek_valid_time(valid_time) {
                    debug!("Valid time selection rejected: {err}");
                }
                None
            }
        }
    }

    fn start_fetch(&mut self, query: FrameQuery) -> BoxFuture<'static, FetchCompletion> {
        self.fetch_token += 1;
        let token = self.fetch_token;
        self.state.apply(Action::SetLoading(true));
        info!("Fetching frames for {query}");
        let source = Arc::clone(&self.source);
        Box::pin(async move {
            let result = source.fetch_frame_set(&query).await;
            FetchCompletion {
                token,
                query,
                result,
            }
        })
    }

    /// Invalidate the pending fetch, if any, without starting another.
    fn supersede_fetch(&mut self) {
        self.fetch_token += 1;
        self.state.apply(Action::SetLoading(false));
    }

    fn on_fetch_complete(&mut self, done: FetchCompletion) {
        if done.token != self.fetch_token {
            debug!("Discarding superseded fetch for {}", done.query);
            return;
        }
        self.state.apply(Action::SetLoading(false));
        match done.result {
            Ok(frames) => self.session.on_new_frame_set(frames),
            Err(err) => self.session.on_fetch_failed(done.query, &err),
        }
    }

    fn probe_task(&self, request: ProbeRequest) -> BoxFuture<'static, ProbeCompletion> {
        let probe = Arc::clone(&self.probe);
        Box::pin(async move {
            debug!("Probing {} (attempt {})", request.url, request.attempt);
            let outcome = probe.probe(&request.url).await;
            ProbeCompletion {
                generation: request.generation,
                url: request.url,
                outcome,
            }
        })
    }

    /// Publish what the session emitted. Only the bus and telemetry fields
    /// are borrowed across awaits; the session itself is not `Sync`.
    async fn flush_events(&mut self) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            let event = SystemEvent::new(event);
            let cloned = event.clone();
            self.bus.publish(event).await?;
            self.telemetry.record_event(cloned).await?;
        }
        Ok(())
    }
}

async fn wait_fetch(fetch: &mut Option<BoxFuture<'static, FetchCompletion>>) -> FetchCompletion {
    match fetch {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => pending().await,
    }
}

pub fn orchestrator_error(message: impl Into<String>) -> NimbusError {
    NimbusError::Orchestrator(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use nimbus_bus::LocalBus;
    use nimbus_types::{
        catalog::ForecastModel,
        events::PrefetchSummary,
        frame::FrameDescriptor,
    };
    use std::{collections::HashSet, time::Duration};
    use tokio::time::timeout;

    struct StaticSource;

    #[async_trait]
    impl FrameSource for StaticSource {
        async fn fetch_frame_set(&self, query: &FrameQuery) -> Result<FrameSet> {
            if query.base_time != 100 {
                return Err(NimbusError::FetchFailure(format!("nothing for {query}")));
            }
            forecast(query.model)
        }

        async fn base_times(&self, _model: ForecastModel, _variable: &str) -> Result<Vec<i64>> {
            Ok(vec![100])
        }
    }

    struct ScriptedProbe {
        failing: HashSet<String>,
    }

    #[async_trait]
    impl ImageProbe for ScriptedProbe {
        async fn probe(&self, url: &str) -> ProbeOutcome {
            if self.failing.contains(url) {
                ProbeOutcome::Failed("unreachable".into())
            } else {
                ProbeOutcome::Loaded
            }
        }
    }

    fn forecast(model: ForecastModel) -> Result<FrameSet> {
        FrameSet::new(
            [100, 200, 300]
                .into_iter()
                .map(|valid| FrameDescriptor::new(100, valid, format!("{model}/{valid}.webp")))
                .collect(),
        )
    }

    /// Answers after a second, like a backend under load.
    struct SlowSource;

    #[async_trait]
    impl FrameSource for SlowSource {
        async fn fetch_frame_set(&self, query: &FrameQuery) -> Result<FrameSet> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            forecast(query.model)
        }

        async fn base_times(&self, _model: ForecastModel, _variable: &str) -> Result<Vec<i64>> {
            Ok(vec![100])
        }
    }

    type Events = BoxStream<'static, SystemEvent>;

    fn start(failing: &[&str]) -> (PlayerHandle, JoinHandle<Result<()>>, Events, TelemetryStore) {
        start_with(StaticSource, failing)
    }

    fn start_with<S: FrameSource + 'static>(
        source: S,
        failing: &[&str],
    ) -> (PlayerHandle, JoinHandle<Result<()>>, Events, TelemetryStore) {
        let bus = LocalBus::new(256);
        let events = bus.subscribe();
        let telemetry = TelemetryStore::new();
        let probe = ScriptedProbe {
            failing: failing.iter().map(|url| url.to_string()).collect(),
        };
        let orchestrator = Orchestrator::new(
            &NimbusConfig::default(),
            source,
            probe,
            bus,
            telemetry.clone(),
        );
        let (handle, task) = orchestrator.spawn();
        (handle, task, events, telemetry)
    }

    async fn next_matching<F>(events: &mut Events, mut predicate: F) -> PlayerEvent
    where
        F: FnMut(&PlayerEvent) -> bool,
    {
        loop {
            let event = timeout(Duration::from_secs(60), events.next())
                .await
                .expect("event before timeout")
                .expect("bus open");
            if predicate(&event.payload) {
                return event.payload;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn plays_through_a_replaced_set() {
        let (handle, task, mut events, telemetry) = start(&[]);
        handle
            .replace(forecast(ForecastModel::Cerrora).unwrap())
            .await
            .unwrap();
        handle.play().await.unwrap();

        let mut indices = Vec::new();
        loop {
            match next_matching(&mut events, |_| true).await {
                PlayerEvent::FrameChanged(changed) => indices.push(changed.index),
                PlayerEvent::PlaybackChanged { playing: false } => break,
                _ => {}
            }
        }
        assert_eq!(indices, vec![0, 1, 2]);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.playback.current_index, 2);
        assert!(!snapshot.playback.is_playing);
        assert!(!snapshot.analyzing);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(!telemetry.snapshot_events().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failing_images_before_summarising() {
        let (handle, task, mut events, telemetry) = start(&["cerrora/200.webp"]);
        handle
            .load(FrameQuery::new(ForecastModel::Cerrora, "rain", 100))
            .await
            .unwrap();

        let failed = next_matching(&mut events, |event| matches!(event, PlayerEvent::ImageFailed { .. })).await;
        assert_eq!(
            failed,
            PlayerEvent::ImageFailed {
                url: "cerrora/200.webp".into(),
                attempts: 3
            }
        );
        let summary = next_matching(&mut events, |event| matches!(event, PlayerEvent::PrefetchSummary(_))).await;
        assert_eq!(
            summary,
            PlayerEvent::PrefetchSummary(PrefetchSummary {
                success_count: 2,
                failed_count: 1,
                forced_count: 0,
                total: 3
            })
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(telemetry.summaries().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_current_set() {
        let (handle, task, mut events, _) = start(&[]);
        handle
            .load(FrameQuery::new(ForecastModel::Cerrora, "rain", 100))
            .await
            .unwrap();
        next_matching(&mut events, |event| matches!(event, PlayerEvent::PrefetchSummary(_))).await;

        handle
            .load(FrameQuery::new(ForecastModel::Cerrora, "rain", 999))
            .await
            .unwrap();
        let failure = next_matching(&mut events, |event| matches!(event, PlayerEvent::FetchFailed { .. })).await;
        assert!(matches!(failure, PlayerEvent::FetchFailed { query, .. } if query.base_time == 999));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total, 3);
        assert_eq!(
            snapshot.current.map(|frame| frame.key()),
            Some(FrameKey::new(100, 100))
        );
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn selection_actions_drive_fetch_and_seek() {
        let (handle, task, mut events, _) = start(&[]);
        handle.dispatch(Action::SelectBaseTime(100)).await.unwrap();
        let first = next_matching(&mut events, |event| matches!(event, PlayerEvent::FrameChanged(_))).await;
        assert!(matches!(first, PlayerEvent::FrameChanged(c) if c.frame.image_url.starts_with("cerrora/")));

        handle
            .dispatch(Action::SelectModel(ForecastModel::Graphcast))
            .await
            .unwrap();
        next_matching(&mut events, |event| *event == PlayerEvent::FrameSetCleared).await;
        let switched = next_matching(&mut events, |event| matches!(event, PlayerEvent::FrameChanged(_))).await;
        assert!(matches!(switched, PlayerEvent::FrameChanged(c) if c.frame.image_url.starts_with("graphcast/")));

        handle.dispatch(Action::SelectValidTime(200)).await.unwrap();
        let sought = next_matching(&mut events, |event| matches!(event, PlayerEvent::FrameChanged(_))).await;
        assert!(matches!(sought, PlayerEvent::FrameChanged(c) if c.index == 1));

        handle.seek(FrameKey::new(100, 42)).await.unwrap();
        next_matching(&mut events, |event| matches!(event, PlayerEvent::SelectionError { .. })).await;
        assert_eq!(handle.snapshot().await.unwrap().playback.current_index, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn model_switch_discards_fetch_for_previous_model() {
        let (handle, task, mut events, _) = start_with(SlowSource, &[]);
        handle
            .load(FrameQuery::new(ForecastModel::Cerrora, "rain", 100))
            .await
            .unwrap();
        handle
            .dispatch(Action::SelectModel(ForecastModel::Graphcast))
            .await
            .unwrap();

        let first = next_matching(&mut events, |event| matches!(event, PlayerEvent::FrameChanged(_))).await;
        assert!(matches!(first, PlayerEvent::FrameChanged(c) if c.frame.image_url.starts_with("graphcast/")));

        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = handle.snapshot().await.unwrap();
        let current = snapshot.current.map(|frame| frame.image_url);
        assert_eq!(current.as_deref(), Some("graphcast/100.webp"));

        let state = handle.app_state().await.unwrap();
        assert_eq!(state.model, ForecastModel::Graphcast);
        assert_eq!(state.variable, "rain");
        assert!(!state.loading);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn replace_clears_loading_of_superseded_fetch() {
        let (handle, task, _events, _) = start_with(SlowSource, &[]);
        handle
            .load(FrameQuery::new(ForecastModel::Cerrora, "rain", 100))
            .await
            .unwrap();
        assert!(handle.app_state().await.unwrap().loading);

        handle
            .replace(forecast(ForecastModel::GroundTruth).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(!handle.app_state().await.unwrap().loading);
        let snapshot = handle.snapshot().await.unwrap();
        let current = snapshot.current.map(|frame| frame.image_url);
        assert_eq!(current.as_deref(), Some("ground_truth/100.webp"));

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn source_change_without_base_time_clears_loading() {
        let (handle, task, _events, _) = start_with(SlowSource, &[]);
        handle
            .replace(forecast(ForecastModel::Cerrora).unwrap())
            .await
            .unwrap();
        handle
            .dispatch(Action::SelectVariable("rain".into()))
            .await
            .unwrap();

        let state = handle.app_state().await.unwrap();
        assert_eq!(state.base_time, None);
        assert!(!state.loading);
        assert_eq!(handle.snapshot().await.unwrap().total, 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
