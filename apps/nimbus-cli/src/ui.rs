use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use nimbus_orchestrator::{Command, PlayerHandle};
use nimbus_playback::SpeedPreset;
use nimbus_types::{
    events::{FrameChanged, PlayerEvent, SystemEvent},
    frame::{format_timestamp, frame_label},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Terminal,
};

const MAX_LOG_ENTRIES: usize = 120;

pub enum UiMessage {
    Event(SystemEvent),
    Shutdown,
}

/// What the screen shows; rebuilt only from published events.
struct View {
    frame: Option<FrameChanged>,
    playing: bool,
    loading: bool,
    unavailable: Vec<String>,
    speed: SpeedPreset,
    status: String,
}

impl View {
    fn new(speed_ms: u64) -> Self {
        Self {
            frame: None,
            playing: false,
            loading: false,
            unavailable: Vec::new(),
            speed: SpeedPreset::nearest(speed_ms),
            status: String::from("Waiting for frames"),
        }
    }

    fn apply(&mut self, event: &SystemEvent) {
        match &event.payload {
            PlayerEvent::FrameChanged(changed) => self.frame = Some(changed.clone()),
            PlayerEvent::PlaybackChanged { playing } => self.playing = *playing,
            PlayerEvent::OverlayChanged { visible } => self.loading = *visible,
            PlayerEvent::ImageFailed { url, .. } => self.unavailable.push(url.clone()),
            PlayerEvent::FrameSetCleared => {
                self.frame = None;
                self.unavailable.clear();
            }
            PlayerEvent::PrefetchSummary(summary) => {
                self.status = format!(
                    "{:?}: {}/{} images",
                    summary.verdict(),
                    summary.success_count + summary.forced_count,
                    summary.total
                );
            }
            PlayerEvent::SelectionError { reason } => self.status = reason.clone(),
            PlayerEvent::FetchFailed { reason, .. } => self.status = reason.clone(),
        }
    }

    fn frame_line(&self) -> Line<'static> {
        let Some(changed) = &self.frame else {
            return Line::from("No frame set loaded");
        };
        let image = if self.unavailable.contains(&changed.frame.image_url) {
            Span::styled("image unavailable", Style::default().fg(Color::Red))
        } else if self.loading {
            Span::styled("loading…", Style::default().fg(Color::Yellow))
        } else {
            Span::raw(changed.frame.image_url.clone())
        };
        Line::from(vec![
            Span::styled(
                frame_label(changed.index, changed.total),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("  valid "),
            Span::raw(format_timestamp(changed.frame.valid_time)),
            Span::raw(format!("  +{}h  ", changed.frame.lead_hours())),
            image,
        ])
    }
}

pub fn run(
    receiver: Receiver<UiMessage>,
    handle: PlayerHandle,
    summary: String,
    speed_ms: u64,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(&mut terminal, receiver, &handle, summary.as_str(), speed_ms);

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    res
}

fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    handle: &PlayerHandle,
    summary: &str,
    speed_ms: u64,
) -> Result<()> {
    let mut logs: VecDeque<String> = VecDeque::with_capacity(MAX_LOG_ENTRIES);
    let mut view = View::new(speed_ms);

    loop {
        let mut closed = false;
        loop {
            match receiver.try_recv() {
                Ok(UiMessage::Event(event)) => {
                    view.apply(&event);
                    if logs.len() == MAX_LOG_ENTRIES {
                        logs.pop_front();
                    }
                    logs.push_back(format_event(&event));
                }
                Ok(UiMessage::Shutdown) | Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(4), Constraint::Min(0)].as_ref())
                .split(f.size());

            let state = if view.playing { "playing" } else { "paused" };
            let header = Paragraph::new(vec![
                Line::from(vec![
                    Span::styled(
                        "Nimbus",
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::raw("  "),
                    Span::raw(summary.to_string()),
                    Span::raw("  "),
                    Span::styled(state, Style::default().fg(Color::Magenta)),
                    Span::raw(format!(" {}  ", view.speed.label())),
                    Span::raw(view.status.clone()),
                ]),
                view.frame_line(),
            ])
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("space play/pause  ←/→ step  +/- speed  home first  q quit"),
            );
            f.render_widget(header, chunks[0]);

            let items: Vec<ListItem> = logs
                .iter()
                .rev()
                .map(|entry| ListItem::new(entry.clone()))
                .collect();
            let list = List::new(items)
                .block(Block::default().borders(Borders::ALL).title("Recent events"));
            f.render_widget(list, chunks[1]);
        })?;

        if closed {
            break;
        }

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                let command = match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char(' ') => Some(Command::TogglePlay),
                    KeyCode::Right => Some(Command::StepForward),
                    KeyCode::Left => Some(Command::StepBack),
                    KeyCode::Home => Some(Command::SeekIndex(0)),
                    KeyCode::Char('+') | KeyCode::Char('=') => {
                        view.speed = view.speed.faster();
                        Some(Command::SetSpeed(view.speed.millis()))
                    }
                    KeyCode::Char('-') => {
                        view.speed = view.speed.slower();
                        Some(Command::SetSpeed(view.speed.millis()))
                    }
                    _ => None,
                };
                if let Some(command) = command {
                    if handle.blocking_send(command).is_err() {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn format_event(event: &SystemEvent) -> String {
    let timestamp = event.timestamp.format("%H:%M:%S");
    match &event.payload {
        PlayerEvent::FrameChanged(changed) => format!(
            "[{}] Frame {} -> {}",
            timestamp,
            changed.key,
            frame_label(changed.index, changed.total)
        ),
        PlayerEvent::PrefetchSummary(summary) => format!(
            "[{}] Prefetch loaded={} failed={} forced={} total={}",
            timestamp,
            summary.success_count,
            summary.failed_count,
            summary.forced_count,
            summary.total
        ),
        PlayerEvent::ImageFailed { url, attempts } => {
            format!("[{}] Image failed after {} attempts: {}", timestamp, attempts, url)
        }
        PlayerEvent::SelectionError { reason } => format!("[{}] Selection {}", timestamp, reason),
        PlayerEvent::FetchFailed { query, reason } => {
            format!("[{}] Fetch {} failed: {}", timestamp, query, reason)
        }
        PlayerEvent::PlaybackChanged { playing } => format!(
            "[{}] Playback {}",
            timestamp,
            if *playing { "started" } else { "paused" }
        ),
        PlayerEvent::OverlayChanged { visible } => format!(
            "[{}] Overlay {}",
            timestamp,
            if *visible { "shown" } else { "hidden" }
        ),
        PlayerEvent::FrameSetCleared => format!("[{}] Frame set cleared", timestamp),
    }
}
