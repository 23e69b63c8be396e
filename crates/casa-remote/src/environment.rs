//! Host-environment signals the engine reacts to.
//!
//! The core never looks at terminals, windows or files on its own; an
//! `EnvironmentObserver` turns whatever the host has into
//! `EnvironmentEvent`s and `spawn_observer` forwards them.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::CoreHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        self == Self::Visible
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentEvent {
    Visibility(Visibility),
    /// Preferences were changed by someone else (another instance, an editor).
    ExternalConfigChange,
}

#[async_trait]
pub trait EnvironmentObserver: Send {
    /// Wait for the next event.  `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<EnvironmentEvent>;
}

/// Events pushed by the host through an `mpsc` sender.
pub struct ChannelObserver {
    rx: mpsc::Receiver<EnvironmentEvent>,
}

impl ChannelObserver {
    pub fn new(buffer: usize) -> (mpsc::Sender<EnvironmentEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl EnvironmentObserver for ChannelObserver {
    async fn next_event(&mut self) -> Option<EnvironmentEvent> {
        self.rx.recv().await
    }
}

/// Watches the preferences file and reports `ExternalConfigChange` whenever
/// its modification time or size moves.
pub struct PreferenceFileObserver {
    path: PathBuf,
    interval: tokio::time::Interval,
    last_seen: Option<Option<(SystemTime, u64)>>,
}

impl PreferenceFileObserver {
    pub fn new(path: impl Into<PathBuf>, period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            path: path.into(),
            interval,
            last_seen: None,
        }
    }

    async fn stamp(&self) -> Option<(SystemTime, u64)> {
        let meta = tokio::fs::metadata(&self.path).await.ok()?;
        Some((meta.modified().ok()?, meta.len()))
    }
}

#[async_trait]
impl EnvironmentObserver for PreferenceFileObserver {
    async fn next_event(&mut self) -> Option<EnvironmentEvent> {
        loop {
            self.interval.tick().await;
            let stamp = self.stamp().await;
            match self.last_seen.replace(stamp) {
                // First look only records the baseline.
                None => continue,
                Some(previous) if previous != stamp => {
                    debug!("Preferences file changed: {}", self.path.display());
                    return Some(EnvironmentEvent::ExternalConfigChange);
                }
                Some(_) => continue,
            }
        }
    }
}

/// Forward `observer`'s events into the core until it runs dry, the core
/// goes away, or `cancel` fires.
pub fn spawn_observer<O>(
    mut observer: O,
    handle: CoreHandle,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    O: EnvironmentObserver + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = observer.next_event() => event,
            };
            let Some(event) = event else { break };
            if handle.environment(event).await.is_err() {
                break;
            }
        }
        info!("Environment observer stopped");
    })
}
