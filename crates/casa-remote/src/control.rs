//! Local state behind the transport and volume controls.
//!
//! The core owns one of each; timers (notice expiry, volume debounce) are
//! spawned by the core and come back as events carrying the sequence number
//! handed out here, so a superseded timer is recognised and ignored.

use std::time::Duration;

use casa_proto::config::ControlConfig;
use casa_proto::protocol::PlayerAction;

/// Follow-up refresh delays after a successful transport command.
pub fn follow_up_delays(action: PlayerAction, cfg: &ControlConfig) -> Vec<Duration> {
    let delays = match action {
        PlayerAction::Play | PlayerAction::Pause => &cfg.play_pause_follow_ups_ms,
        PlayerAction::Next | PlayerAction::Previous => &cfg.skip_follow_ups_ms,
    };
    delays.iter().copied().map(Duration::from_millis).collect()
}

// ── Control notice ────────────────────────────────────────────────────────────

/// Transient control-failure message, independent of the blocking view state.
#[derive(Debug, Default)]
pub struct NoticeBoard {
    message: Option<String>,
    seq: u64,
}

impl NoticeBoard {
    pub fn current(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Replace the notice.  Returns the sequence number its expiry timer must carry.
    pub fn post(&mut self, message: String) -> u64 {
        self.seq += 1;
        self.message = Some(message);
        self.seq
    }

    /// Clear the notice if it is still the one posted as `seq`.
    pub fn expire(&mut self, seq: u64) -> bool {
        if seq == self.seq && self.message.is_some() {
            self.message = None;
            true
        } else {
            false
        }
    }
}

// ── Volume ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct VolumeState {
    current: Option<u8>,
    last_nonzero: Option<u8>,
    seq: u64,
}

impl VolumeState {
    pub fn current(&self) -> Option<u8> {
        self.current
    }

    /// Value read from the zone.  Ignored while a local change is waiting to
    /// be written, so a slow read cannot undo the slider.
    pub fn on_server(&mut self, volume: u8, write_pending: bool) -> bool {
        if write_pending || self.current == Some(volume) {
            return false;
        }
        self.remember(volume);
        true
    }

    /// Apply a slider value locally.  Returns the debounce sequence number;
    /// only the timer carrying the latest number gets to write.
    pub fn set_local(&mut self, volume: u8) -> u64 {
        self.remember(volume.min(100));
        self.seq += 1;
        self.seq
    }

    /// The value to write if `seq` is still the latest change.
    pub fn debounced(&self, seq: u64) -> Option<u8> {
        if seq == self.seq {
            self.current
        } else {
            None
        }
    }

    /// Target for a mute toggle: 0 when audible, else the last non-zero level
    /// (or `fallback`).  `None` while the volume is unknown.
    pub fn mute_target(&self, fallback: u8) -> Option<u8> {
        match self.current? {
            0 => Some(self.last_nonzero.unwrap_or(fallback)),
            _ => Some(0),
        }
    }

    pub fn reset(&mut self) {
        *self = Self {
            seq: self.seq + 1,
            ..Self::default()
        };
    }

    fn remember(&mut self, volume: u8) {
        self.current = Some(volume);
        if volume > 0 {
            self.last_nonzero = Some(volume);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_ups_by_action() {
        let cfg = ControlConfig::default();
        assert_eq!(
            follow_up_delays(PlayerAction::Pause, &cfg),
            vec![Duration::from_millis(300), Duration::from_millis(900)]
        );
        assert_eq!(
            follow_up_delays(PlayerAction::Next, &cfg),
            vec![Duration::from_millis(300), Duration::from_millis(1200)]
        );
    }

    #[test]
    fn test_notice_expires_only_for_its_own_seq() {
        let mut board = NoticeBoard::default();
        let first = board.post("API error: 500 Internal Server Error".into());
        let second = board.post("Unauthorized (401): check API access".into());
        assert!(!board.expire(first));
        assert_eq!(board.current(), Some("Unauthorized (401): check API access"));
        assert!(board.expire(second));
        assert_eq!(board.current(), None);
        assert!(!board.expire(second));
    }

    #[test]
    fn test_volume_debounce_keeps_latest() {
        let mut vol = VolumeState::default();
        let a = vol.set_local(10);
        let b = vol.set_local(30);
        let c = vol.set_local(55);
        assert_eq!(vol.debounced(a), None);
        assert_eq!(vol.debounced(b), None);
        assert_eq!(vol.debounced(c), Some(55));
        assert_eq!(vol.current(), Some(55));
    }

    #[test]
    fn test_mute_restores_previous_level() {
        let mut vol = VolumeState::default();
        assert_eq!(vol.mute_target(25), None);

        vol.on_server(40, false);
        assert_eq!(vol.mute_target(25), Some(0));
        vol.set_local(0);
        assert_eq!(vol.current(), Some(0));
        assert_eq!(vol.mute_target(25), Some(40));
    }

    #[test]
    fn test_unmute_without_history_uses_fallback() {
        let mut vol = VolumeState::default();
        vol.on_server(0, false);
        assert_eq!(vol.mute_target(25), Some(25));
    }

    #[test]
    fn test_server_read_ignored_while_write_pending() {
        let mut vol = VolumeState::default();
        vol.set_local(70);
        assert!(!vol.on_server(20, true));
        assert_eq!(vol.current(), Some(70));
        assert!(vol.on_server(20, false));
        assert_eq!(vol.current(), Some(20));
    }
}
