/// SyncCore: single-owner event loop for one zone's now-playing state.
///
/// Everything that mutates the snapshot, the poll bookkeeping or the control
/// state goes through `CoreEvent`s on one `mpsc` channel.  Network calls and
/// timers run in spawned tasks that report back on the same channel, tagged
/// with the subscription `generation` they were started for; anything that
/// arrives for an older generation is dropped on the floor.
///
/// Observers follow along through `CoreUpdate`s on a `tokio::sync::broadcast`
/// channel, or ask for a full `CoreStatus`.
use std::sync::Arc;
use std::time::Duration;

use casa_proto::config::Config;
use casa_proto::prefs::{PreferenceStore, Preferences};
use casa_proto::protocol::{
    NowPlayingSnapshot, PlaybackStatus, PlayerAction, Track, TrackIdentity, ZoneSummary,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ExternalMedia, ZoneApi};
use crate::canvas::CanvasMeta;
use crate::control::{self, NoticeBoard, VolumeState};
use crate::environment::{EnvironmentEvent, Visibility};
use crate::error::{SyncError, SyncResult};
use crate::fetcher::{fetch_now_playing, FetchOutcome};
use crate::intent::IntentState;
use crate::palette::{self, Palette};
use crate::progress::{ProgressClock, TickEffect, TickerChange};
use crate::schedule::{self, PollState};
use crate::track_change::TrackChangeDetector;

const EVENT_BUFFER: usize = 256;
const UPDATE_BUFFER: usize = 256;
const TICK: Duration = Duration::from_secs(1);
const VOLUME_UNKNOWN: &str = "Volume unavailable: cannot mute";

// ── Public surface ────────────────────────────────────────────────────────────

/// What the view should be showing instead of (or along with) the controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    /// No zone selected.
    Idle,
    /// Waiting for the first now-playing document.
    Loading,
    /// The first fetch failed; nothing to show yet.
    Failed(String),
    /// The zone reports no current song.
    NoSong,
    Ready,
}

#[derive(Debug, Clone)]
pub enum CoreUpdate {
    Zone(Option<String>),
    View(ViewState),
    /// Snapshot replaced, or its status changed locally.
    Snapshot(NowPlayingSnapshot),
    Progress { progress_secs: u32, duration_secs: u32 },
    TrackChanged { identity: TrackIdentity, track: Track },
    Artwork(Option<String>),
    /// `None` when canvas lookups are off or the track has no streaming id.
    Canvas(Option<CanvasMeta>),
    Palette(Palette),
    Volume(u8),
    /// Transient control-failure notice; `None` once it expires.
    Notice(Option<String>),
}

/// Point-in-time copy of the engine state.
#[derive(Debug, Clone)]
pub struct CoreStatus {
    pub zone: Option<String>,
    pub view: ViewState,
    pub snapshot: Option<NowPlayingSnapshot>,
    pub last_etag: Option<String>,
    pub consecutive_errors: u32,
    pub poll_in_flight: bool,
    /// Delay the pending poll timer was armed with, if one is pending.
    pub armed_poll_delay: Option<Duration>,
    pub ticker_running: bool,
    pub status_pending: bool,
    pub volume: Option<u8>,
    pub notice: Option<String>,
    pub canvas: Option<CanvasMeta>,
    pub palette: Palette,
    pub visibility: Visibility,
}

/// Commands accepted from hosts.
#[derive(Debug)]
pub enum CoreCommand {
    SelectZone(Option<String>),
    Refresh,
    Action(PlayerAction),
    TogglePlayPause,
    SetVolume(u8),
    ToggleMute,
    ReadVolume,
    Environment(EnvironmentEvent),
    Inspect(oneshot::Sender<CoreStatus>),
    Shutdown,
}

/// All inputs into the SyncCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    Command(CoreCommand),
    PollDue { generation: u64, timer_seq: u64 },
    PollCompleted { generation: u64, outcome: FetchOutcome },
    /// End-of-track and control follow-up refreshes.
    RefreshDue { generation: u64 },
    ProgressTick { generation: u64 },
    IntentCheck { generation: u64 },
    ActionCompleted {
        generation: u64,
        action: PlayerAction,
        result: SyncResult<()>,
    },
    VolumeDebounced { generation: u64, seq: u64 },
    VolumeWritten {
        generation: u64,
        seq: u64,
        result: SyncResult<()>,
    },
    VolumeRead {
        generation: u64,
        result: SyncResult<ZoneSummary>,
    },
    NoticeExpired { seq: u64 },
    CanvasResolved {
        generation: u64,
        identity: TrackIdentity,
        meta: CanvasMeta,
    },
    PaletteResolved {
        generation: u64,
        identity: TrackIdentity,
        result: SyncResult<Palette>,
    },
}

/// Cheap, cloneable command surface of a running `SyncCore`.
#[derive(Debug, Clone)]
pub struct CoreHandle {
    tx: mpsc::Sender<CoreEvent>,
    updates: broadcast::Sender<CoreUpdate>,
}

impl CoreHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<CoreUpdate> {
        self.updates.subscribe()
    }

    pub async fn send(&self, command: CoreCommand) -> anyhow::Result<()> {
        self.tx
            .send(CoreEvent::Command(command))
            .await
            .map_err(|_| anyhow::anyhow!("sync core has stopped"))
    }

    pub async fn select_zone(&self, zone: Option<String>) -> anyhow::Result<()> {
        self.send(CoreCommand::SelectZone(zone)).await
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        self.send(CoreCommand::Refresh).await
    }

    pub async fn action(&self, action: PlayerAction) -> anyhow::Result<()> {
        self.send(CoreCommand::Action(action)).await
    }

    pub async fn toggle_play_pause(&self) -> anyhow::Result<()> {
        self.send(CoreCommand::TogglePlayPause).await
    }

    pub async fn set_volume(&self, volume: u8) -> anyhow::Result<()> {
        self.send(CoreCommand::SetVolume(volume)).await
    }

    pub async fn toggle_mute(&self) -> anyhow::Result<()> {
        self.send(CoreCommand::ToggleMute).await
    }

    pub async fn read_volume(&self) -> anyhow::Result<()> {
        self.send(CoreCommand::ReadVolume).await
    }

    pub async fn environment(&self, event: EnvironmentEvent) -> anyhow::Result<()> {
        self.send(CoreCommand::Environment(event)).await
    }

    pub async fn status(&self) -> anyhow::Result<CoreStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(CoreCommand::Inspect(tx)).await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send(CoreCommand::Shutdown).await
    }
}

// ── SyncCore ──────────────────────────────────────────────────────────────────

pub struct SyncCore {
    config: Config,
    store: PreferenceStore,
    prefs: Preferences,
    api: Arc<dyn ZoneApi>,
    media: Arc<dyn ExternalMedia>,
    event_tx: mpsc::Sender<CoreEvent>,
    update_tx: broadcast::Sender<CoreUpdate>,

    zone: Option<String>,
    /// Bumped on every zone change; stale task results are ignored.
    generation: u64,
    /// Cancels every request of the current subscription.
    cancel: CancellationToken,
    view: ViewState,
    visibility: Visibility,

    snapshot: Option<NowPlayingSnapshot>,
    poll: PollState,
    poll_in_flight: bool,
    refresh_queued: bool,
    poll_timer: Option<(AbortHandle, Duration)>,
    timer_seq: u64,

    clock: ProgressClock,
    ticker: Option<AbortHandle>,
    detector: TrackChangeDetector,

    status_intent: IntentState<PlaybackStatus>,
    intent_watch: Option<AbortHandle>,
    notice: NoticeBoard,
    volume: VolumeState,
    volume_write_pending: bool,
    /// A mute toggle arrived before the volume was known.
    mute_after_read: bool,

    canvas: Option<CanvasMeta>,
    /// Track and streaming id the current canvas belongs to.
    canvas_key: Option<(TrackIdentity, String)>,
    canvas_task: Option<AbortHandle>,
    palette: Palette,
    palette_task: Option<AbortHandle>,
}

impl SyncCore {
    pub fn new(
        config: Config,
        store: PreferenceStore,
        api: Arc<dyn ZoneApi>,
        media: Arc<dyn ExternalMedia>,
        event_tx: mpsc::Sender<CoreEvent>,
        update_tx: broadcast::Sender<CoreUpdate>,
    ) -> Self {
        let prefs = store.load();
        Self {
            config,
            store,
            prefs,
            api,
            media,
            event_tx,
            update_tx,
            zone: None,
            generation: 0,
            cancel: CancellationToken::new(),
            view: ViewState::Idle,
            visibility: Visibility::Visible,
            snapshot: None,
            poll: PollState::default(),
            poll_in_flight: false,
            refresh_queued: false,
            poll_timer: None,
            timer_seq: 0,
            clock: ProgressClock::new(),
            ticker: None,
            detector: TrackChangeDetector::new(),
            status_intent: IntentState::new(PlaybackStatus::Stopped),
            intent_watch: None,
            notice: NoticeBoard::default(),
            volume: VolumeState::default(),
            volume_write_pending: false,
            mute_after_read: false,
            canvas: None,
            canvas_key: None,
            canvas_task: None,
            palette: Palette::default(),
            palette_task: None,
        }
    }

    /// Build a core, spawn its loop, and return the handle to drive it.
    pub fn start(
        config: Config,
        store: PreferenceStore,
        api: Arc<dyn ZoneApi>,
        media: Arc<dyn ExternalMedia>,
    ) -> (CoreHandle, tokio::task::JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (update_tx, _) = broadcast::channel(UPDATE_BUFFER);
        let handle = CoreHandle {
            tx: event_tx.clone(),
            updates: update_tx.clone(),
        };
        let core = Self::new(config, store, api, media, event_tx, update_tx);
        let join = tokio::spawn(core.run(event_rx));
        (handle, join)
    }

    /// Run until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) {
        info!("SyncCore: starting event loop");
        while let Some(evt) = event_rx.recv().await {
            if let CoreEvent::Command(CoreCommand::Shutdown) = evt {
                info!("SyncCore: shutdown requested");
                break;
            }
            self.handle_event(evt);
        }
        self.teardown();
        info!("SyncCore: stopped");
    }

    fn handle_event(&mut self, evt: CoreEvent) {
        match evt {
            CoreEvent::Command(cmd) => self.handle_command(cmd),

            CoreEvent::PollDue {
                generation,
                timer_seq,
            } => {
                if generation != self.generation || timer_seq != self.timer_seq {
                    debug!("SyncCore: dropping superseded poll timer");
                    return;
                }
                self.poll_timer = None;
                if !self.poll_in_flight {
                    self.start_poll();
                }
            }

            CoreEvent::PollCompleted {
                generation,
                outcome,
            } => {
                if generation != self.generation {
                    debug!("SyncCore: discarding late poll result for generation {}", generation);
                    return;
                }
                self.on_poll_completed(outcome);
            }

            CoreEvent::RefreshDue { generation } => {
                if generation == self.generation {
                    self.request_refresh();
                }
            }

            CoreEvent::ProgressTick { generation } => {
                if generation == self.generation {
                    self.on_progress_tick();
                }
            }

            CoreEvent::IntentCheck { generation } => {
                if generation == self.generation
                    && self.status_intent.tick(self.config.control.intent_timeout())
                {
                    self.revert_status_intent();
                }
            }

            CoreEvent::ActionCompleted {
                generation,
                action,
                result,
            } => {
                if generation == self.generation {
                    self.on_action_completed(action, result);
                }
            }

            CoreEvent::VolumeDebounced { generation, seq } => {
                if generation != self.generation {
                    return;
                }
                if let (Some(volume), Some(zone)) = (self.volume.debounced(seq), self.zone.clone()) {
                    let api = Arc::clone(&self.api);
                    self.spawn_reporting(async move {
                        let result = api.set_volume(&zone, volume).await;
                        CoreEvent::VolumeWritten {
                            generation,
                            seq,
                            result,
                        }
                    });
                }
            }

            CoreEvent::VolumeWritten {
                generation,
                seq,
                result,
            } => {
                if generation != self.generation {
                    return;
                }
                if self.volume.debounced(seq).is_some() {
                    self.volume_write_pending = false;
                }
                if let Err(e) = result {
                    warn!("SyncCore: volume change failed: {}", e);
                    self.post_notice(e.control_message());
                }
            }

            CoreEvent::VolumeRead { generation, result } => {
                if generation != self.generation {
                    return;
                }
                let mute = std::mem::take(&mut self.mute_after_read);
                match result {
                    Ok(summary) => {
                        if let Some(volume) = summary.volume_percent() {
                            if self.volume.on_server(volume, self.volume_write_pending) {
                                self.broadcast(CoreUpdate::Volume(volume));
                            }
                        }
                        if mute {
                            match self.volume.mute_target(self.config.control.mute_restore_volume) {
                                Some(target) => self.set_volume(target),
                                None => self.post_notice(VOLUME_UNKNOWN.to_string()),
                            }
                        }
                    }
                    Err(e) if mute => {
                        warn!("SyncCore: volume read for mute failed: {}", e);
                        self.post_notice(e.control_message());
                    }
                    Err(e) => debug!("SyncCore: volume read failed: {}", e),
                }
            }

            CoreEvent::NoticeExpired { seq } => {
                if self.notice.expire(seq) {
                    self.broadcast(CoreUpdate::Notice(None));
                }
            }

            CoreEvent::CanvasResolved {
                generation,
                identity,
                meta,
            } => {
                if generation != self.generation || self.detector.current() != Some(&identity) {
                    debug!("SyncCore: discarding canvas for {}", identity);
                    return;
                }
                self.canvas_task = None;
                self.canvas = Some(meta.clone());
                self.broadcast(CoreUpdate::Canvas(Some(meta)));
            }

            CoreEvent::PaletteResolved {
                generation,
                identity,
                result,
            } => {
                if generation != self.generation || self.detector.current() != Some(&identity) {
                    return;
                }
                self.palette_task = None;
                match result {
                    Ok(palette) => {
                        debug!("SyncCore: palette {:?} for {}", palette, identity);
                        self.palette = palette.clone();
                        self.broadcast(CoreUpdate::Palette(palette));
                    }
                    Err(e) => warn!("SyncCore: palette for {} failed: {}", identity, e),
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: CoreCommand) {
        match cmd {
            CoreCommand::SelectZone(zone) => self.select_zone(zone),
            CoreCommand::Refresh => self.request_refresh(),
            CoreCommand::Action(action) => self.dispatch_action(action),
            CoreCommand::TogglePlayPause => {
                let playing = self
                    .snapshot
                    .as_ref()
                    .map(NowPlayingSnapshot::is_playing)
                    .unwrap_or(false);
                let action = if playing {
                    PlayerAction::Pause
                } else {
                    PlayerAction::Play
                };
                self.dispatch_action(action);
            }
            CoreCommand::SetVolume(volume) => self.set_volume(volume),
            CoreCommand::ToggleMute => {
                match self.volume.mute_target(self.config.control.mute_restore_volume) {
                    Some(target) => self.set_volume(target),
                    None => {
                        debug!("SyncCore: mute with unknown volume, reading it first");
                        self.mute_after_read = true;
                        self.read_volume();
                    }
                }
            }
            CoreCommand::ReadVolume => self.read_volume(),
            CoreCommand::Environment(event) => self.on_environment(event),
            CoreCommand::Inspect(reply) => {
                let _ = reply.send(self.status());
            }
            // Handled by `run`.
            CoreCommand::Shutdown => {}
        }
    }

    // ── Subscription lifecycle ────────────────────────────────────────────────

    fn select_zone(&mut self, zone: Option<String>) {
        let zone = zone.map(|z| z.trim().to_string()).filter(|z| !z.is_empty());
        if zone == self.zone && zone.is_some() {
            self.request_refresh();
            return;
        }
        info!("SyncCore: zone {:?} → {:?}", self.zone, zone);
        self.teardown();
        self.zone = zone.clone();
        self.broadcast(CoreUpdate::Zone(zone.clone()));

        let persisted = zone.clone();
        match self.store.update(|p| p.selected_zone = persisted) {
            // Keep our copy in step so the file watcher's echo of this write
            // is recognised as no change.
            Ok(prefs) => self.prefs = prefs,
            Err(e) => warn!("SyncCore: could not persist selected zone: {}", e),
        }

        match zone {
            Some(_) => {
                self.set_view(ViewState::Loading);
                self.start_poll();
                self.read_volume();
            }
            None => self.set_view(ViewState::Idle),
        }
    }

    /// Cancel everything belonging to the current subscription.
    fn teardown(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.generation += 1;

        self.cancel_poll_timer();
        for task in [
            self.ticker.take(),
            self.intent_watch.take(),
            self.canvas_task.take(),
            self.palette_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }

        self.snapshot = None;
        self.poll = PollState::default();
        self.poll_in_flight = false;
        self.refresh_queued = false;
        self.clock.reset();
        self.detector.reset();
        self.status_intent.settle(PlaybackStatus::Stopped);
        self.volume.reset();
        self.volume_write_pending = false;
        self.mute_after_read = false;
        self.canvas = None;
        self.canvas_key = None;
        self.palette = Palette::default();
    }

    // ── Polling ───────────────────────────────────────────────────────────────

    /// Poll now, or right after the poll already in flight.
    fn request_refresh(&mut self) {
        if self.zone.is_none() {
            return;
        }
        if self.poll_in_flight {
            self.refresh_queued = true;
            return;
        }
        if self.snapshot.is_none() {
            self.set_view(ViewState::Loading);
        }
        self.start_poll();
    }

    fn start_poll(&mut self) {
        let Some(zone) = self.zone.clone() else {
            return;
        };
        self.cancel_poll_timer();
        self.poll_in_flight = true;

        let api = Arc::clone(&self.api);
        let etag = self.poll.last_etag.clone();
        let cancel = self.cancel.clone();
        let generation = self.generation;
        debug!("SyncCore: polling {} (etag {:?})", zone, etag);
        self.spawn_reporting(async move {
            let outcome = fetch_now_playing(api.as_ref(), &zone, etag.as_deref(), &cancel).await;
            CoreEvent::PollCompleted {
                generation,
                outcome,
            }
        });
    }

    fn on_poll_completed(&mut self, outcome: FetchOutcome) {
        self.poll_in_flight = false;
        match outcome {
            FetchOutcome::Cancelled => {
                debug!("SyncCore: poll cancelled");
                return;
            }
            FetchOutcome::Unchanged if self.snapshot.is_some() => {
                self.poll.record_success(None);
            }
            FetchOutcome::Unchanged => {
                // 304 without anything to keep.
                self.on_poll_failed(SyncError::DataShape("not modified before first document".into()));
            }
            FetchOutcome::Updated { snapshot, etag } => {
                self.poll.record_success(etag);
                self.apply_snapshot(snapshot);
            }
            FetchOutcome::Failed(e) => self.on_poll_failed(e),
        }

        if std::mem::take(&mut self.refresh_queued) {
            self.start_poll();
            return;
        }
        self.schedule_next_poll();
    }

    fn on_poll_failed(&mut self, error: SyncError) {
        self.poll.record_failure();
        let errors = self.poll.consecutive_errors;
        if self.snapshot.is_none() {
            warn!("SyncCore: initial fetch failed: {}", error);
            self.set_view(ViewState::Failed(error.to_string()));
        } else if errors == 1 {
            warn!("SyncCore: poll failed: {}", error);
        } else {
            debug!("SyncCore: poll failed ({} in a row): {}", errors, error);
        }
    }

    /// Arm the single poll timer from the current snapshot.  Nothing is armed
    /// before the first document arrives.
    fn schedule_next_poll(&mut self) {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return;
        };
        let delay = schedule::next_delay(
            snapshot,
            self.visibility.is_visible(),
            self.poll.consecutive_errors,
            &self.config.polling,
        );
        self.cancel_poll_timer();
        self.timer_seq += 1;
        let event = CoreEvent::PollDue {
            generation: self.generation,
            timer_seq: self.timer_seq,
        };
        let handle = self.send_after(delay, event);
        self.poll_timer = Some((handle, delay));
        debug!("SyncCore: next poll in {:?}", delay);
    }

    fn cancel_poll_timer(&mut self) {
        if let Some((handle, _)) = self.poll_timer.take() {
            handle.abort();
        }
    }

    // ── Snapshot, progress and derived state ──────────────────────────────────

    fn apply_snapshot(&mut self, mut snapshot: NowPlayingSnapshot) {
        self.status_intent.on_confirmed(snapshot.status);
        // An unconfirmed play/pause keeps showing what the user asked for.
        snapshot.status = *self.status_intent.intended();

        let changed = self.detector.observe(&snapshot);
        self.set_view(if snapshot.current_track.is_some() {
            ViewState::Ready
        } else {
            ViewState::NoSong
        });
        self.update_ticker(&snapshot);
        self.snapshot = Some(snapshot.clone());
        self.broadcast(CoreUpdate::Snapshot(snapshot.clone()));

        if let (Some(identity), Some(track)) = (changed, snapshot.current_track) {
            self.on_track_changed(identity, track);
        }
    }

    fn update_ticker(&mut self, snapshot: &NowPlayingSnapshot) {
        match self.clock.on_snapshot(snapshot) {
            TickerChange::Start => {
                let tx = self.event_tx.clone();
                let generation = self.generation;
                let task = tokio::spawn(async move {
                    let mut interval = tokio::time::interval_at(Instant::now() + TICK, TICK);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        interval.tick().await;
                        if tx.send(CoreEvent::ProgressTick { generation }).await.is_err() {
                            break;
                        }
                    }
                });
                if let Some(old) = self.ticker.replace(task.abort_handle()) {
                    old.abort();
                }
            }
            TickerChange::Stop => {
                if let Some(ticker) = self.ticker.take() {
                    ticker.abort();
                }
            }
            TickerChange::Keep => {}
        }
    }

    fn on_progress_tick(&mut self) {
        let Some(snapshot) = self.snapshot.as_mut() else {
            return;
        };
        let duration_secs = snapshot.duration_secs();
        match self.clock.tick(snapshot) {
            TickEffect::None => {}
            TickEffect::Advanced(progress_secs) => {
                self.broadcast(CoreUpdate::Progress {
                    progress_secs,
                    duration_secs,
                });
            }
            TickEffect::ReachedEnd(progress_secs) => {
                self.broadcast(CoreUpdate::Progress {
                    progress_secs,
                    duration_secs,
                });
                debug!("SyncCore: reached end of track, refreshing");
                let delay = self.config.polling.end_of_track_refresh();
                self.send_after(
                    delay,
                    CoreEvent::RefreshDue {
                        generation: self.generation,
                    },
                );
            }
        }
    }

    fn on_track_changed(&mut self, identity: TrackIdentity, track: Track) {
        info!("SyncCore: now playing {}", identity);
        self.broadcast(CoreUpdate::TrackChanged {
            identity: identity.clone(),
            track: track.clone(),
        });
        self.broadcast(CoreUpdate::Artwork(track.artwork_uri.clone()));
        self.refresh_palette(&identity, &track);
        self.refresh_canvas();
    }

    fn refresh_palette(&mut self, identity: &TrackIdentity, track: &Track) {
        if let Some(task) = self.palette_task.take() {
            task.abort();
        }
        let Some(uri) = track.artwork_uri.clone() else {
            if self.palette != Palette::default() {
                self.palette = Palette::default();
                self.broadcast(CoreUpdate::Palette(self.palette.clone()));
            }
            return;
        };

        let media = Arc::clone(&self.media);
        let generation = self.generation;
        let identity = identity.clone();
        let task = self.spawn_reporting(async move {
            let result = match media.artwork(&uri).await {
                Ok(bytes) => tokio::task::spawn_blocking(move || palette::extract(&bytes))
                    .await
                    .unwrap_or_else(|e| Err(SyncError::Artwork(e.to_string()))),
                Err(e) => Err(e),
            };
            CoreEvent::PaletteResolved {
                generation,
                identity,
                result,
            }
        });
        self.palette_task = Some(task);
    }

    /// Start a canvas lookup if the theme wants one and the current track has
    /// not been looked up yet.
    fn refresh_canvas(&mut self) {
        let endpoint = self.config.canvas.api_url.clone().filter(|u| !u.trim().is_empty());
        let target = match (endpoint, self.prefs.canvas_enabled()) {
            (Some(endpoint), true) => self.detector.current().cloned().and_then(|identity| {
                self.snapshot
                    .as_ref()
                    .and_then(|s| s.current_track.as_ref())
                    .and_then(|t| t.external_track_id(&self.config.canvas.streaming_service))
                    .map(|id| (endpoint, identity, id))
            }),
            _ => None,
        };

        let Some((endpoint, identity, track_id)) = target else {
            if let Some(task) = self.canvas_task.take() {
                task.abort();
            }
            self.canvas_key = None;
            if self.canvas.take().is_some() {
                self.broadcast(CoreUpdate::Canvas(None));
            }
            return;
        };

        let key = (identity.clone(), track_id.clone());
        if self.canvas_key.as_ref() == Some(&key) {
            return;
        }
        if let Some(task) = self.canvas_task.take() {
            task.abort();
        }
        self.canvas_key = Some(key);
        if self.canvas.take().is_some() {
            self.broadcast(CoreUpdate::Canvas(None));
        }

        debug!("SyncCore: canvas lookup for {}", track_id);
        let media = Arc::clone(&self.media);
        let generation = self.generation;
        let task = self.spawn_reporting(async move {
            let meta = media.canvas(&endpoint, &track_id).await;
            CoreEvent::CanvasResolved {
                generation,
                identity,
                meta,
            }
        });
        self.canvas_task = Some(task);
    }

    // ── Controls ──────────────────────────────────────────────────────────────

    fn dispatch_action(&mut self, action: PlayerAction) {
        let Some(zone) = self.zone.clone() else {
            self.post_notice("No zone selected".to_string());
            return;
        };
        info!("SyncCore: {} on {}", action, zone);
        let api = Arc::clone(&self.api);
        let generation = self.generation;
        self.spawn_reporting(async move {
            let result = api.player_action(&zone, action).await;
            CoreEvent::ActionCompleted {
                generation,
                action,
                result,
            }
        });
    }

    fn on_action_completed(&mut self, action: PlayerAction, result: SyncResult<()>) {
        if let Err(e) = result {
            warn!("SyncCore: {} failed: {}", action, e);
            self.post_notice(e.control_message());
            return;
        }

        if let Some(expected) = action.expected_status() {
            self.apply_status_intent(expected);
        }
        for delay in control::follow_up_delays(action, &self.config.control) {
            self.send_after(
                delay,
                CoreEvent::RefreshDue {
                    generation: self.generation,
                },
            );
        }
    }

    fn apply_status_intent(&mut self, expected: PlaybackStatus) {
        let Some(mut snapshot) = self.snapshot.clone() else {
            return;
        };
        self.status_intent.set_intent(expected);

        if self.status_intent.is_pending() {
            let handle = self.send_after(
                self.config.control.intent_timeout(),
                CoreEvent::IntentCheck {
                    generation: self.generation,
                },
            );
            if let Some(old) = self.intent_watch.replace(handle) {
                old.abort();
            }
        } else if let Some(old) = self.intent_watch.take() {
            // Back to what the server last reported; nothing left to time out.
            old.abort();
        }

        // Compare with what is on screen, which may be an earlier intent.
        let shown = *self.status_intent.intended();
        if snapshot.status == shown {
            return;
        }
        snapshot.status = shown;
        self.update_ticker(&snapshot);
        self.snapshot = Some(snapshot.clone());
        self.broadcast(CoreUpdate::Snapshot(snapshot));
    }

    fn revert_status_intent(&mut self) {
        self.intent_watch = None;
        let confirmed = *self.status_intent.confirmed();
        let Some(mut snapshot) = self.snapshot.clone() else {
            return;
        };
        if snapshot.status == confirmed {
            return;
        }
        info!(
            "SyncCore: {} never confirmed, back to {}",
            snapshot.status.label(),
            confirmed.label()
        );
        snapshot.status = confirmed;
        self.update_ticker(&snapshot);
        self.snapshot = Some(snapshot.clone());
        self.broadcast(CoreUpdate::Snapshot(snapshot));
    }

    fn set_volume(&mut self, volume: u8) {
        if self.zone.is_none() {
            return;
        }
        let volume = volume.min(100);
        let seq = self.volume.set_local(volume);
        self.volume_write_pending = true;
        self.broadcast(CoreUpdate::Volume(volume));
        self.send_after(
            self.config.control.volume_debounce(),
            CoreEvent::VolumeDebounced {
                generation: self.generation,
                seq,
            },
        );
    }

    fn read_volume(&mut self) {
        let Some(zone) = self.zone.clone() else {
            return;
        };
        let api = Arc::clone(&self.api);
        let generation = self.generation;
        self.spawn_reporting(async move {
            let result = api.zone(&zone).await;
            CoreEvent::VolumeRead { generation, result }
        });
    }

    fn post_notice(&mut self, message: String) {
        let seq = self.notice.post(message.clone());
        self.broadcast(CoreUpdate::Notice(Some(message)));
        self.send_after(self.config.control.notice_ttl(), CoreEvent::NoticeExpired { seq });
    }

    // ── Environment ───────────────────────────────────────────────────────────

    fn on_environment(&mut self, event: EnvironmentEvent) {
        match event {
            EnvironmentEvent::Visibility(visibility) => {
                let was = self.visibility;
                self.visibility = visibility;
                if visibility == Visibility::Visible && was == Visibility::Hidden {
                    debug!("SyncCore: visible again, refreshing");
                    self.request_refresh();
                }
            }
            EnvironmentEvent::ExternalConfigChange => {
                if self.reload_prefs() {
                    self.refresh_canvas();
                }
            }
        }
    }

    /// Re-read preferences.  Returns `false` when nothing changed.
    fn reload_prefs(&mut self) -> bool {
        let prefs = self.store.load();
        if prefs == self.prefs {
            debug!("SyncCore: preferences file touched, contents unchanged");
            return false;
        }
        self.prefs = prefs;
        debug!("SyncCore: preferences reloaded (theme {})", self.prefs.theme);
        true
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn set_view(&mut self, view: ViewState) {
        if self.view != view {
            self.view = view.clone();
            self.broadcast(CoreUpdate::View(view));
        }
    }

    fn broadcast(&self, update: CoreUpdate) {
        // No subscribers is fine.
        let _ = self.update_tx.send(update);
    }

    fn send_after(&self, delay: Duration, event: CoreEvent) -> AbortHandle {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        })
        .abort_handle()
    }

    fn spawn_reporting<F>(&self, task: F) -> AbortHandle
    where
        F: std::future::Future<Output = CoreEvent> + Send + 'static,
    {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let event = task.await;
            let _ = tx.send(event).await;
        })
        .abort_handle()
    }

    fn status(&self) -> CoreStatus {
        CoreStatus {
            zone: self.zone.clone(),
            view: self.view.clone(),
            snapshot: self.snapshot.clone(),
            last_etag: self.poll.last_etag.clone(),
            consecutive_errors: self.poll.consecutive_errors,
            poll_in_flight: self.poll_in_flight,
            armed_poll_delay: self.poll_timer.as_ref().map(|(_, delay)| *delay),
            ticker_running: self.ticker.is_some(),
            status_pending: self.status_intent.is_pending(),
            volume: self.volume.current(),
            notice: self.notice.current().map(str::to_string),
            canvas: self.canvas.clone(),
            palette: self.palette.clone(),
            visibility: self.visibility,
        }
    }
}
