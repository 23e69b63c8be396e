//! Adaptive poll cadence.
//!
//! `next_delay` is a pure function of the current snapshot, visibility and
//! error count; the core owns the single timer it feeds.

use std::time::Duration;

use casa_proto::config::PollingConfig;
use casa_proto::protocol::NowPlayingSnapshot;

/// Per-subscription poll bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollState {
    pub last_etag: Option<String>,
    pub consecutive_errors: u32,
}

impl PollState {
    /// Any outcome other than a failure.
    pub fn record_success(&mut self, etag: Option<String>) {
        self.consecutive_errors = 0;
        if etag.is_some() {
            self.last_etag = etag;
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }
}

/// Delay before the next poll.
///
/// Base interval by play state, the near-end ramp while playing, the hidden
/// floor when the track is not about to end, then capped exponential backoff.
pub fn next_delay(
    snapshot: &NowPlayingSnapshot,
    visible: bool,
    consecutive_errors: u32,
    cfg: &PollingConfig,
) -> Duration {
    let playing = snapshot.is_playing();
    let near_end = snapshot
        .remaining_secs()
        .is_some_and(|r| r <= cfg.near_end_threshold_secs);

    let mut delay = if playing {
        cfg.playing_interval_ms
    } else {
        cfg.idle_interval_ms
    };
    if playing && near_end {
        delay = cfg.near_end_interval_ms;
    }
    // Unknown duration counts as "plenty of time left".
    if !visible && !near_end {
        delay = delay.max(cfg.hidden_interval_ms);
    }
    if consecutive_errors > 0 {
        let factor = 1u64
            .checked_shl(consecutive_errors.min(63))
            .unwrap_or(u64::MAX)
            .min(cfg.max_backoff_factor.max(1));
        delay = delay.saturating_mul(factor).min(cfg.max_interval_ms);
    }
    Duration::from_millis(delay)
}
