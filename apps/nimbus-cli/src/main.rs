mod ui;

use std::{
    env,
    path::{Path, PathBuf},
    sync::mpsc,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::{stream::BoxStream, StreamExt};
use nimbus_bus::{EventBus, LocalBus};
use nimbus_loader::DecodeProbe;
use nimbus_ops::{ensure_telemetry_dir, init_tracing, TelemetryStore};
use nimbus_orchestrator::{Orchestrator, PlayerHandle};
use nimbus_source::{ArchiveSource, FrameSource};
use nimbus_types::{
    catalog::{ComparisonSet, ForecastModel, FrameQuery},
    config::{NimbusConfig, OpsConfig},
    events::{PlayerEvent, SystemEvent},
    frame::{format_timestamp, frame_label},
    state::Action,
};
use tracing::{info, warn};

use crate::ui::UiMessage;

const BUS_CAPACITY: usize = 256;
const TUI_LOG_FILE: &str = "nimbus.log";

/// Play back an archived forecast run frame by frame.
#[derive(Parser, Debug)]
#[command(name = "nimbus", version)]
struct Args {
    /// Config file; falls back to $NIMBUS_CONFIG, then configs/dev.toml.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    model: Option<ForecastModel>,
    #[arg(long)]
    variable: Option<String>,
    /// Forecast run (unix seconds). Defaults to the latest archived run.
    #[arg(long)]
    base_time: Option<i64>,
    /// Milliseconds between frames during autoplay.
    #[arg(long)]
    speed: Option<u64>,
    /// Also list the other models' images for each displayed frame.
    #[arg(long)]
    compare: bool,
    /// Interactive terminal player instead of a one-shot playthrough.
    #[arg(long)]
    tui: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.clone());
    if let Some(model) = args.model {
        config.source.default_model = model;
    }
    if let Some(variable) = &args.variable {
        config.source.default_variable = variable.clone();
    }
    if let Some(speed) = args.speed {
        config.playback.speed_ms = speed.max(config.playback.min_speed_ms);
    }

    let telemetry_dir = ensure_telemetry_dir(&config.ops.telemetry_dir)?;
    if args.tui {
        route_logs_for_tui(&mut config.ops, &telemetry_dir);
    }
    init_tracing(&config.ops)?;

    let model = config.source.default_model;
    let variable = config.source.default_variable.clone();
    let source = ArchiveSource::new(
        &config.source.archive_dir,
        config.source.image_base_url.clone(),
    );
    let base_time = match args.base_time {
        Some(base_time) => base_time,
        None => source
            .base_times(model, &variable)
            .await?
            .last()
            .copied()
            .with_context(|| format!("no archived runs for {model}/{variable}"))?,
    };
    info!("Selected run {} for {model}/{variable}", format_timestamp(base_time));

    let comparison = if args.compare {
        Some(load_comparison(&source, &variable, base_time).await)
    } else {
        None
    };

    let probe = DecodeProbe::new(Some(PathBuf::from(&config.source.archive_dir)));
    let bus = LocalBus::new(BUS_CAPACITY);
    let telemetry = TelemetryStore::new();
    let events = bus.subscribe();

    let orchestrator = Orchestrator::new(&config, source, probe, bus, telemetry.clone());
    let (handle, task) = orchestrator.spawn();
    handle.dispatch(Action::SelectBaseTime(base_time)).await?;

    let outcome = if args.tui {
        let summary = format!(
            "{model}/{variable} @ {}",
            format_timestamp(base_time)
        );
        run_tui(handle.clone(), events, summary, config.playback.speed_ms).await
    } else {
        run_headless(&handle, events, model, comparison.as_ref()).await
    };

    // The task may already be gone if it failed; its own error wins below.
    let _ = handle.shutdown().await;
    task.await.context("player task panicked")??;
    telemetry.persist(&telemetry_dir).await?;
    outcome
}

async fn load_comparison(source: &ArchiveSource, variable: &str, base_time: i64) -> ComparisonSet {
    let mut comparison = ComparisonSet::new();
    for model in ForecastModel::ALL {
        let query = FrameQuery::new(model, variable, base_time);
        match source.fetch_frame_set(&query).await {
            Ok(frames) => {
                comparison.insert(model, frames);
            }
            Err(err) => warn!("Skipping {model} in comparison: {err}"),
        }
    }
    comparison
}

async fn run_headless(
    handle: &PlayerHandle,
    mut events: BoxStream<'static, SystemEvent>,
    model: ForecastModel,
    comparison: Option<&ComparisonSet>,
) -> Result<()> {
    let mut started = false;
    let mut total = 0;

    while let Some(event) = events.next().await {
        match event.payload {
            PlayerEvent::FrameChanged(changed) => {
                total = changed.total;
                println!(
                    "{:<16} valid {}  +{}h  {}",
                    frame_label(changed.index, changed.total),
                    format_timestamp(changed.frame.valid_time),
                    changed.frame.lead_hours(),
                    changed.frame.image_url
                );
                if let Some(comparison) = comparison {
                    for (other, frame) in comparison.frames_at(&changed.key) {
                        if other != model {
                            println!("{:<16} {other}: {}", "", frame.image_url);
                        }
                    }
                }
            }
            PlayerEvent::PrefetchSummary(summary) => {
                println!(
                    "Prefetch {:?}: {} loaded, {} failed, {} forced of {}",
                    summary.verdict(),
                    summary.success_count,
                    summary.failed_count,
                    summary.forced_count,
                    summary.total
                );
                if started {
                    continue;
                }
                started = true;
                if total < 2 {
                    break;
                }
                handle.play().await?;
            }
            PlayerEvent::ImageFailed { url, attempts } => {
                eprintln!("Image unavailable after {attempts} attempts: {url}");
            }
            PlayerEvent::FetchFailed { query, reason } => {
                bail!("could not load frames for {query}: {reason}");
            }
            PlayerEvent::PlaybackChanged { playing: false } if started => break,
            _ => {}
        }
    }
    Ok(())
}

async fn run_tui(
    handle: PlayerHandle,
    mut events: BoxStream<'static, SystemEvent>,
    summary: String,
    speed_ms: u64,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let forward = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if tx.send(UiMessage::Event(event)).is_err() {
                break;
            }
        }
        let _ = tx.send(UiMessage::Shutdown);
    });

    let result = tokio::task::spawn_blocking(move || ui::run(rx, handle, summary, speed_ms))
        .await
        .context("terminal ui thread panicked")?;
    forward.abort();
    result
}

/// The terminal ui owns stdout, so logs go to a file unless one is configured.
fn route_logs_for_tui(ops: &mut OpsConfig, telemetry_dir: &Path) {
    if ops.log_file.is_none() {
        ops.log_file = Some(telemetry_dir.join(TUI_LOG_FILE).display().to_string());
    }
}

fn load_config(from_args: Option<String>) -> NimbusConfig {
    let from_env = env::var("NIMBUS_CONFIG").ok();
    let path = from_args
        .or(from_env)
        .unwrap_or_else(|| "configs/dev.toml".into());
    match NimbusConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path
                );
                NimbusConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path
            );
            NimbusConfig::default()
        }
    }
}
