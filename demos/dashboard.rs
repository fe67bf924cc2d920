use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use mqtt_media_player::{
    BridgeOptions, DeviceRegistry, DiscoveredDevice, DiscoveryOutcome, MediaPlayer, MqttBus,
    PlaybackState, RepeatMode, SetupFlow, StateReceiver,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type DemoResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(PartialEq)]
enum AppState {
    Discovery,
    PlayerControl,
}

struct App {
    state: AppState,
    bus: Arc<MqttBus>,
    options: BridgeOptions,
    flow: SetupFlow,
    registry: DeviceRegistry,
    devices: Vec<DiscoveredDevice>,
    selected_device_index: usize,
    player: Option<MediaPlayer>,
    update_receiver: Option<StateReceiver>,
    status_message: String,
    json_cursor: usize,
    json_scroll: usize,
}

impl App {
    fn new(bus: Arc<MqttBus>, options: BridgeOptions) -> Self {
        let flow = SetupFlow::new(bus.clone(), options.clone());
        Self {
            state: AppState::Discovery,
            bus,
            options,
            flow,
            registry: DeviceRegistry::new(),
            devices: Vec::new(),
            selected_device_index: 0,
            player: None,
            update_receiver: None,
            status_message: "Press r to scan for media players".to_string(),
            json_cursor: 0,
            json_scroll: 0,
        }
    }

    async fn scan(&mut self) {
        match self.flow.discover_or_manual(&self.registry).await {
            Ok(DiscoveryOutcome::Found(devices)) => {
                self.status_message = format!(
                    "Found {} player(s). Press Enter to connect.",
                    devices.len()
                );
                self.devices = devices;
            }
            Ok(DiscoveryOutcome::NoDevices) => {
                self.devices.clear();
                self.status_message = "No media players found. Press r to scan again.".to_string();
            }
            Err(e) => {
                self.devices.clear();
                self.status_message = format!("Discovery failed ({})", e.reason);
            }
        }
        self.selected_device_index = 0;
    }

    fn select_next(&mut self) {
        if !self.devices.is_empty() {
            self.selected_device_index = (self.selected_device_index + 1) % self.devices.len();
        }
    }

    fn select_previous(&mut self) {
        if !self.devices.is_empty() {
            self.selected_device_index = self
                .selected_device_index
                .checked_sub(1)
                .unwrap_or(self.devices.len() - 1);
        }
    }

    async fn connect_to_selected_device(&mut self) -> DemoResult<()> {
        let Some(device) = self.devices.get(self.selected_device_index).cloned() else {
            self.status_message = "No player to connect to".to_string();
            return Ok(());
        };

        let entry = match self.flow.confirm(&mut self.registry, device) {
            Ok(entry) => entry,
            Err(e) => {
                self.status_message = format!("Cannot add player ({})", e.reason);
                return Ok(());
            }
        };

        let player = MediaPlayer::setup(self.bus.clone(), entry, self.options.clone()).await?;
        self.update_receiver = Some(player.subscribe());
        self.status_message = format!(
            "Connected to {}. space play/pause, +/- volume, m mute, Esc back, q quit",
            player.title()
        );
        self.player = Some(player);
        self.state = AppState::PlayerControl;
        Ok(())
    }

    async fn go_back(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.teardown().await;
            self.registry.remove(player.unique_id());
        }
        self.update_receiver = None;
        self.state = AppState::Discovery;
        self.json_cursor = 0;
        self.json_scroll = 0;
        self.status_message = format!(
            "{} player(s) found. Press Enter to connect, r to rescan.",
            self.devices.len()
        );
    }

    async fn toggle_play(&mut self) {
        let Some(player) = &self.player else { return };
        let result = match player.effective_state() {
            Some(PlaybackState::Playing) => player.pause().await,
            _ => player.play().await,
        };
        self.report("Play/pause", result);
    }

    async fn toggle_power(&mut self) {
        let Some(player) = &self.player else { return };
        let result = match player.effective_state() {
            Some(PlaybackState::Off) | None => player.turn_on().await,
            _ => player.turn_off().await,
        };
        self.report("Power", result);
    }

    async fn toggle_mute(&mut self) {
        let Some(player) = &self.player else { return };
        let muted = player.is_volume_muted().unwrap_or(false);
        let result = player.mute(!muted).await;
        self.report("Mute", result);
    }

    async fn toggle_shuffle(&mut self) {
        let Some(player) = &self.player else { return };
        let shuffle = player.snapshot().shuffle.unwrap_or(false);
        let result = player.set_shuffle(!shuffle).await;
        self.report("Shuffle", result);
    }

    async fn cycle_repeat(&mut self) {
        let Some(player) = &self.player else { return };
        let next = match player.snapshot().repeat {
            Some(RepeatMode::Off) | None => RepeatMode::All,
            Some(RepeatMode::All) => RepeatMode::One,
            Some(RepeatMode::One) => RepeatMode::Off,
        };
        let result = player.set_repeat(next).await;
        self.report("Repeat", result);
    }

    async fn cycle_source(&mut self) {
        let Some(player) = &self.player else { return };
        let sources = player.source_list().unwrap_or_default();
        if sources.is_empty() {
            self.status_message = "No sources available".to_string();
            return;
        }

        let current = player.source();
        let next_idx = current
            .and_then(|c| sources.iter().position(|s| *s == c))
            .map_or(0, |idx| (idx + 1) % sources.len());
        let result = player.select_source(&sources[next_idx]).await;
        self.report("Source", result);
    }

    async fn adjust_volume(&mut self, up: bool) {
        let Some(player) = &self.player else { return };
        let result = if up {
            player.volume_up().await
        } else {
            player.volume_down().await
        };
        self.report("Volume", result);
    }

    async fn simple_command(&mut self, key: char) {
        let Some(player) = &self.player else { return };
        let (label, result) = match key {
            'n' => ("Next", player.next_track().await),
            'p' => ("Previous", player.previous_track().await),
            's' => ("Stop", player.stop().await),
            'c' => ("Clear playlist", player.clear_playlist().await),
            _ => return,
        };
        self.report(label, result);
    }

    fn report(
        &mut self,
        label: &str,
        result: mqtt_media_player::Result<mqtt_media_player::DispatchOutcome>,
    ) {
        self.status_message = match result {
            Ok(mqtt_media_player::DispatchOutcome::Published { topic }) => {
                format!("{}: sent to {}", label, topic)
            }
            Ok(mqtt_media_player::DispatchOutcome::NotConfigured) => {
                format!("{}: not supported by this player", label)
            }
            Err(e) => format!("{} failed: {}", label, e),
        };
    }

    fn handle_state_update(&mut self) {
        if let Some(receiver) = &mut self.update_receiver {
            match receiver.try_recv() {
                Ok(Some(update)) => {
                    self.status_message = format!("{} updated", update.change.field());
                }
                Ok(None) => {}
                Err(e) => {
                    self.status_message = format!("Update stream: {}", e);
                }
            }
        }
    }

    fn snapshot_json(&self) -> Option<String> {
        let player = self.player.as_ref()?;
        Some(match serde_json::to_string_pretty(&player.snapshot()) {
            Ok(json) => json,
            Err(e) => format!("Error serializing state: {}", e),
        })
    }

    fn json_cursor_down(&mut self, visible_height: usize) {
        let max_lines = self.snapshot_json().map_or(0, |json| json.lines().count());
        if self.json_cursor + 1 < max_lines {
            self.json_cursor += 1;
            if self.json_cursor >= self.json_scroll + visible_height {
                self.json_scroll = self.json_cursor.saturating_sub(visible_height - 1);
            }
        }
    }

    fn json_cursor_up(&mut self) {
        if self.json_cursor > 0 {
            self.json_cursor -= 1;
            if self.json_cursor < self.json_scroll {
                self.json_scroll = self.json_cursor;
            }
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let outer_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.size());

    match app.state {
        AppState::Discovery => render_discovery(f, app, outer_chunks[0]),
        AppState::PlayerControl => {
            let inner_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(outer_chunks[0]);

            render_player(f, app, inner_chunks[0]);
            render_state_dump(f, app, inner_chunks[1]);
        }
    }

    render_status(f, app, outer_chunks[1]);
}

fn label(text: &str) -> Span<'_> {
    Span::styled(text, Style::default().fg(Color::Yellow))
}

fn value(text: String) -> Span<'static> {
    Span::styled(
        text,
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )
}

fn render_discovery(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Media Players (r scan, j/k select, Enter connect, q quit) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if app.devices.is_empty() {
        let text = Paragraph::new(format!(
            "No players listed.\n\nDevices advertise on {}",
            app.options.discovery_topic()
        ))
        .block(block)
        .wrap(Wrap { trim: true });
        f.render_widget(text, area);
        return;
    }

    let items: Vec<ListItem> = app
        .devices
        .iter()
        .map(|device| {
            ListItem::new(vec![
                Line::from(vec![label("Name: "), Span::raw(device.name.clone())]),
                Line::from(vec![label("ID: "), Span::raw(device.unique_id.clone())]),
                Line::from(vec![
                    label("Features: "),
                    Span::raw(format!("{}", device.config.capabilities().len())),
                ]),
                Line::from(""),
            ])
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(app.selected_device_index));

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">> ");

    f.render_stateful_widget(list, area, &mut state);
}

fn on_off(flag: Option<bool>) -> String {
    match flag {
        Some(true) => "ON".to_string(),
        Some(false) => "OFF".to_string(),
        None => "Unknown".to_string(),
    }
}

const PLAYER_KEYS: &str = concat!(
    " Player (space play/pause, n/p track, s stop, +/- vol, m mute,",
    " h shuffle, r repeat, i source, o power, Esc back) "
);

fn render_player(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(PLAYER_KEYS)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let Some(player) = &app.player else {
        let text = Paragraph::new("No player connected").block(block);
        f.render_widget(text, area);
        return;
    };

    let state = player.snapshot();
    let playback = player
        .effective_state()
        .map_or("Unknown", PlaybackState::as_str);

    let mut lines = vec![
        Line::from(vec![
            Span::styled(
                "Player: ",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
            Span::raw(player.title().to_string()),
        ]),
        Line::from(""),
        Line::from(vec![label("State: "), value(playback.to_string())]),
        Line::from(vec![label("Available: "), value(on_off(state.available))]),
        Line::from(vec![
            label("Volume: "),
            value(
                state
                    .volume_level
                    .map_or("Unknown".to_string(), |v| format!("{:.0}%", v * 100.0)),
            ),
        ]),
        Line::from(vec![label("Mute: "), value(on_off(state.is_volume_muted))]),
        Line::from(vec![label("Shuffle: "), value(on_off(state.shuffle))]),
        Line::from(vec![
            label("Repeat: "),
            value(state.repeat.map_or("Unknown", RepeatMode::as_str).to_string()),
        ]),
        Line::from(""),
    ];

    let media = [
        ("Title: ", &state.media_title),
        ("Artist: ", &state.media_artist),
        ("Album: ", &state.media_album_name),
        ("Source: ", &state.source),
        ("App: ", &state.app_name),
    ];
    for (name, field) in media {
        if let Some(text) = field {
            lines.push(Line::from(vec![label(name), Span::raw(text.clone())]));
        }
    }

    if let (Some(position), Some(duration)) = (state.media_position, state.media_duration) {
        lines.push(Line::from(vec![
            label("Position: "),
            Span::raw(format!("{}s / {}s", position, duration)),
        ]));
    }

    if let Some(sources) = &state.source_list {
        lines.push(Line::from(""));
        lines.push(Line::from(label("Sources:")));
        for source in sources {
            let is_active = state.source.as_ref() == Some(source);
            let prefix = if is_active { "  ▶ " } else { "    " };
            lines.push(Line::from(vec![
                Span::raw(prefix),
                Span::styled(
                    source.clone(),
                    if is_active {
                        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    },
                ),
            ]));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        label("Features: "),
        Span::raw(player.supported_features().names().join(", ")),
    ]));

    let text = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    f.render_widget(text, area);
}

fn render_state_dump(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" State JSON (j/k scroll) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let Some(json_str) = app.snapshot_json() else {
        let text = Paragraph::new("No state available").block(block);
        f.render_widget(text, area);
        return;
    };

    let styled_lines: Vec<Line> = json_str
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == app.json_cursor {
                Line::from(Span::styled(
                    format!("> {}", line),
                    Style::default().bg(Color::DarkGray).fg(Color::White),
                ))
            } else {
                Line::from(format!("  {}", line))
            }
        })
        .collect();

    let text = Paragraph::new(styled_lines)
        .block(block)
        .scroll((app.json_scroll as u16, 0));
    f.render_widget(text, area);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let text = Paragraph::new(app.status_message.clone())
        .block(block)
        .wrap(Wrap { trim: true });

    f.render_widget(text, area);
}

fn init_logging() -> DemoResult<()> {
    // Logs go to a file; the terminal belongs to the TUI
    let file = std::fs::File::create("dashboard.log")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> DemoResult<()> {
    init_logging()?;

    let host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1883);
    let client_id = format!("media-dashboard-{}", std::process::id());
    let bus = Arc::new(MqttBus::connect(client_id, host, port));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(bus, BridgeOptions::default());

    let res = run_app(&mut terminal, &mut app).await;

    if let Some(mut player) = app.player.take() {
        player.teardown().await;
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {}", err);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> DemoResult<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        app.handle_state_update();

        if !event::poll(std::time::Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match app.state {
            AppState::Discovery => match key.code {
                KeyCode::Char('q') => return Ok(()),
                KeyCode::Char('r') => {
                    app.status_message = format!(
                        "Scanning for {:?}...",
                        app.options.discovery_timeout
                    );
                    terminal.draw(|f| ui(f, app))?;
                    app.scan().await;
                }
                KeyCode::Char('j') | KeyCode::Down => app.select_next(),
                KeyCode::Char('k') | KeyCode::Up => app.select_previous(),
                KeyCode::Enter => app.connect_to_selected_device().await?,
                _ => {}
            },
            AppState::PlayerControl => match key.code {
                KeyCode::Char('q') => return Ok(()),
                KeyCode::Esc => app.go_back().await,
                KeyCode::Char(' ') => app.toggle_play().await,
                KeyCode::Char('+') | KeyCode::Char('=') => app.adjust_volume(true).await,
                KeyCode::Char('-') | KeyCode::Char('_') => app.adjust_volume(false).await,
                KeyCode::Char('m') => app.toggle_mute().await,
                KeyCode::Char('h') => app.toggle_shuffle().await,
                KeyCode::Char('r') => app.cycle_repeat().await,
                KeyCode::Char('i') => app.cycle_source().await,
                KeyCode::Char('o') => app.toggle_power().await,
                KeyCode::Char(c @ ('n' | 'p' | 's' | 'c')) => app.simple_command(c).await,
                KeyCode::Char('j') => app.json_cursor_down(20), // Assume ~20 lines visible
                KeyCode::Char('k') => app.json_cursor_up(),
                _ => {}
            },
        }
    }
}
