use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use casa_proto::config::Config;
use casa_proto::prefs::PreferenceStore;
use casa_proto::protocol::PlayerAction;
use casa_remote::api::{HttpExternalMedia, HttpZoneApi, ZoneApi};
use casa_remote::environment::{
    spawn_observer, ChannelObserver, EnvironmentEvent, PreferenceFileObserver, Visibility,
};
use casa_remote::{CoreHandle, CoreUpdate, SyncCore};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

const PREFS_POLL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "casa-remote")]
#[command(about = "Follow and control what a whole-home audio zone is playing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL, overriding config and environment
    #[arg(long, global = true)]
    api: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the zones the API knows about
    Zones,
    /// Follow a zone's now-playing state; reads commands from stdin
    Watch {
        /// Zone name; defaults to the last selected zone
        zone: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = casa_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("casa-remote.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("casa-remote log: {}", log_path.display());
    tracing::info!("casa-remote starting…");

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Config unreadable, using defaults: {}", e);
        Config::default()
    });
    if let Some(api) = cli.api {
        config.api.base_url = api;
    }

    match cli.command {
        Commands::Zones => list_zones(&config).await,
        Commands::Watch { zone } => watch(config, zone).await,
    }
}

async fn list_zones(config: &Config) -> anyhow::Result<()> {
    let api = HttpZoneApi::new(&config.api)?;
    let zones = api.zones().await.context("listing zones")?;
    if zones.is_empty() {
        println!("No zones.");
    }
    for zone in zones {
        let volume = zone
            .volume_percent()
            .map(|v| format!("{:>3}%", v))
            .unwrap_or_else(|| "   -".to_string());
        println!(
            "{:<24} {} {}",
            zone.name,
            if zone.power { "on " } else { "off" },
            volume
        );
    }
    Ok(())
}

async fn watch(config: Config, zone: Option<String>) -> anyhow::Result<()> {
    let store = PreferenceStore::new(config.paths.preferences_file.clone());
    let zone = zone
        .or_else(|| store.load().selected_zone)
        .context("no zone given and none selected before; try `casa-remote zones`")?;

    let default_video = config.canvas.default_video.clone();
    let service = config.canvas.streaming_service.clone();
    let api = Arc::new(HttpZoneApi::new(&config.api)?);
    let media = Arc::new(HttpExternalMedia::new(&config.api)?);
    let (handle, core_task) = SyncCore::start(config, store.clone(), api, media);

    let cancel = CancellationToken::new();
    let printer = tokio::spawn(print_updates(handle.clone(), default_video));
    let (env_tx, env_observer) = ChannelObserver::new(16);
    spawn_observer(env_observer, handle.clone(), cancel.clone());
    spawn_observer(
        PreferenceFileObserver::new(store.path(), PREFS_POLL),
        handle.clone(),
        cancel.clone(),
    );

    handle.select_zone(Some(zone)).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_input(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
        };
        match input {
            Input::Quit => break,
            Input::Visibility(v) => env_tx.send(EnvironmentEvent::Visibility(v)).await?,
            Input::Status => {
                let links = store.load().show_streaming_links;
                print_status(&handle, links.then_some(service.as_str())).await?
            }
            other => dispatch(&handle, other).await?,
        }
    }

    cancel.cancel();
    handle.shutdown().await?;
    core_task.await?;
    printer.abort();
    tracing::info!("casa-remote exiting");
    Ok(())
}

async fn dispatch(handle: &CoreHandle, input: Input) -> anyhow::Result<()> {
    match input {
        Input::Action(action) => handle.action(action).await,
        Input::Toggle => handle.toggle_play_pause().await,
        Input::Volume(Some(v)) => handle.set_volume(v).await,
        Input::Volume(None) => handle.read_volume().await,
        Input::Mute => handle.toggle_mute().await,
        Input::Zone(name) => handle.select_zone(Some(name)).await,
        Input::Refresh => handle.refresh().await,
        Input::Visibility(_) | Input::Status | Input::Quit => Ok(()),
    }
}

async fn print_updates(handle: CoreHandle, default_video: Option<String>) {
    let mut rx = handle.subscribe();
    loop {
        let update = match rx.recv().await {
            Ok(update) => update,
            Err(RecvError::Lagged(n)) => {
                tracing::debug!("printer lagged {} updates", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let line = match update {
            CoreUpdate::Zone(Some(zone)) => format!("zone: {}", zone),
            CoreUpdate::Zone(None) => "zone: none".to_string(),
            CoreUpdate::View(view) => format!("view: {:?}", view),
            CoreUpdate::TrackChanged { track, .. } => {
                let mut line = format!("now playing: {}", track.title);
                if let Some(artist) = &track.artist {
                    line.push_str(&format!(" by {}", artist));
                }
                if let Some(album) = track.album.as_deref().filter(|a| !a.is_empty()) {
                    line.push_str(&format!(" ({})", album));
                }
                line
            }
            CoreUpdate::Snapshot(snapshot) => format!(
                "{} {}/{}",
                snapshot.status.label(),
                clock(snapshot.progress_secs),
                clock(snapshot.duration_secs())
            ),
            CoreUpdate::Volume(v) => format!("volume: {}", v),
            CoreUpdate::Notice(Some(msg)) => format!("! {}", msg),
            CoreUpdate::Canvas(Some(meta)) => match meta.video_url(default_video.as_deref()) {
                Some(url) => format!("canvas: {}", url),
                None => "canvas: none".to_string(),
            },
            CoreUpdate::Palette(p) => format!("palette: {} {} text {}", p.dominant, p.accent, p.text),
            // Too chatty for a terminal.
            CoreUpdate::Progress { .. }
            | CoreUpdate::Artwork(_)
            | CoreUpdate::Canvas(None)
            | CoreUpdate::Notice(None) => continue,
        };
        println!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), line);
    }
}

/// `links` names the streaming service whose links to list, if any.
async fn print_status(handle: &CoreHandle, links: Option<&str>) -> anyhow::Result<()> {
    let status = handle.status().await?;
    println!("zone:    {}", status.zone.as_deref().unwrap_or("-"));
    println!("view:    {:?}", status.view);
    if let Some(snapshot) = &status.snapshot {
        if let Some(track) = &snapshot.current_track {
            println!("track:   {} / {}", track.title, track.artist_display());
            if let Some(service) = links {
                let links = track.streaming_links(service);
                for (kind, uri) in [
                    ("track", &links.track),
                    ("artist", &links.artist),
                    ("album", &links.album),
                    ("playlist", &links.playlist),
                ] {
                    if let Some(uri) = uri {
                        println!("  {:<8} {}", kind, uri);
                    }
                }
            }
        }
        println!(
            "state:   {}{} {}/{}",
            snapshot.status.label(),
            if status.status_pending { " (pending)" } else { "" },
            clock(snapshot.progress_secs),
            clock(snapshot.duration_secs())
        );
        if let Some(next) = &snapshot.next_track {
            println!("next:    {} / {}", next.title, next.artist_display());
        }
    }
    match status.volume {
        Some(v) => println!("volume:  {}", v),
        None => println!("volume:  unknown"),
    }
    if let Some(delay) = status.armed_poll_delay {
        println!("poll:    every {:?} ({} errors)", delay, status.consecutive_errors);
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Action(PlayerAction),
    Toggle,
    Volume(Option<u8>),
    Mute,
    Zone(String),
    Visibility(Visibility),
    Refresh,
    Status,
    Quit,
}

fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (cmd, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));
    let input = match cmd.to_ascii_lowercase().as_str() {
        "play" => Input::Action(PlayerAction::Play),
        "pause" => Input::Action(PlayerAction::Pause),
        "toggle" => Input::Toggle,
        "next" => Input::Action(PlayerAction::Next),
        "prev" | "previous" => Input::Action(PlayerAction::Previous),
        "vol" | "volume" if rest.is_empty() => Input::Volume(None),
        "vol" | "volume" => match rest.parse::<u8>() {
            Ok(v) if v <= 100 => Input::Volume(Some(v)),
            _ => return Err(format!("volume must be 0-100, got {:?}", rest)),
        },
        "mute" => Input::Mute,
        "zone" if rest.is_empty() => return Err("usage: zone NAME".to_string()),
        "zone" => Input::Zone(rest.to_string()),
        "hide" => Input::Visibility(Visibility::Hidden),
        "show" => Input::Visibility(Visibility::Visible),
        "refresh" => Input::Refresh,
        "status" => Input::Status,
        "quit" | "exit" => Input::Quit,
        other => {
            return Err(format!(
                "unknown command {:?}; try play, pause, toggle, next, prev, vol [N], mute, zone NAME, hide, show, refresh, status, quit",
                other
            ))
        }
    };
    Ok(Some(input))
}

fn clock(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
