//! Local playback-position extrapolation between polls.
//!
//! The core runs a one-second ticker only while the zone is playing and
//! applies `ProgressClock::tick` to its current snapshot.  The clock decides
//! when the ticker has to start or stop and when the end of the track calls
//! for an out-of-band refresh.

use casa_proto::protocol::NowPlayingSnapshot;

/// What the core has to do with its ticker after a snapshot change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerChange {
    Start,
    Stop,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEffect {
    /// Nothing moved (not playing, unknown duration, or already at the end
    /// with the refresh requested).
    None,
    Advanced(u32),
    /// Position reached the declared duration; request one refresh.
    ReachedEnd(u32),
}

#[derive(Debug, Default)]
pub struct ProgressClock {
    running: bool,
    end_refresh_armed: bool,
}

impl ProgressClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call whenever the snapshot is replaced or its status changes locally.
    /// Only a transition into or out of playing touches the ticker.
    pub fn on_snapshot(&mut self, snapshot: &NowPlayingSnapshot) -> TickerChange {
        let duration = snapshot.duration_secs();
        if duration == 0 || snapshot.progress_secs < duration {
            self.end_refresh_armed = false;
        }
        match (self.running, snapshot.is_playing()) {
            (false, true) => {
                self.running = true;
                TickerChange::Start
            }
            (true, false) => {
                self.running = false;
                TickerChange::Stop
            }
            _ => TickerChange::Keep,
        }
    }

    /// Forget everything; the ticker is gone with the subscription.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// One second of wall-clock time while playing.
    pub fn tick(&mut self, snapshot: &mut NowPlayingSnapshot) -> TickEffect {
        if !snapshot.is_playing() {
            return TickEffect::None;
        }
        let duration = snapshot.duration_secs();
        if duration == 0 {
            return TickEffect::None;
        }

        let next = snapshot.progress_secs.saturating_add(1).min(duration);
        let advanced = next != snapshot.progress_secs;
        snapshot.progress_secs = next;

        if next >= duration && !self.end_refresh_armed {
            self.end_refresh_armed = true;
            return TickEffect::ReachedEnd(next);
        }
        if advanced {
            TickEffect::Advanced(next)
        } else {
            TickEffect::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casa_proto::protocol::{PlaybackStatus, Track};

    fn snap(status: PlaybackStatus, progress: u32, duration: u32) -> NowPlayingSnapshot {
        NowPlayingSnapshot {
            status,
            progress_secs: progress,
            current_track: Some(Track {
                title: "A".into(),
                artist: Some("B".into()),
                album: None,
                duration_secs: duration,
                artwork_uri: None,
                external_links: Vec::new(),
            }),
            next_track: None,
        }
    }

    #[test]
    fn test_advances_one_second_per_tick() {
        let mut clock = ProgressClock::new();
        let mut s = snap(PlaybackStatus::Playing, 42, 200);
        assert_eq!(clock.on_snapshot(&s), TickerChange::Start);
        assert_eq!(clock.tick(&mut s), TickEffect::Advanced(43));
        assert_eq!(s.progress_secs, 43);
    }

    #[test]
    fn test_pause_stops_ticker_and_progress() {
        let mut clock = ProgressClock::new();
        let mut s = snap(PlaybackStatus::Playing, 42, 200);
        clock.on_snapshot(&s);
        s.status = PlaybackStatus::Paused;
        assert_eq!(clock.on_snapshot(&s), TickerChange::Stop);
        assert_eq!(clock.tick(&mut s), TickEffect::None);
        assert_eq!(s.progress_secs, 42);
    }

    #[test]
    fn test_replacing_snapshot_keeps_single_ticker() {
        let mut clock = ProgressClock::new();
        assert_eq!(clock.on_snapshot(&snap(PlaybackStatus::Playing, 1, 200)), TickerChange::Start);
        assert_eq!(clock.on_snapshot(&snap(PlaybackStatus::Playing, 6, 200)), TickerChange::Keep);
        assert_eq!(clock.on_snapshot(&snap(PlaybackStatus::Playing, 11, 200)), TickerChange::Keep);
        assert_eq!(clock.on_snapshot(&snap(PlaybackStatus::Stopped, 0, 0)), TickerChange::Stop);
        assert_eq!(clock.on_snapshot(&snap(PlaybackStatus::Paused, 0, 0)), TickerChange::Keep);
    }

    #[test]
    fn test_end_of_track_requests_exactly_one_refresh() {
        let mut clock = ProgressClock::new();
        let mut s = snap(PlaybackStatus::Playing, 198, 200);
        clock.on_snapshot(&s);
        assert_eq!(clock.tick(&mut s), TickEffect::Advanced(199));
        assert_eq!(clock.tick(&mut s), TickEffect::ReachedEnd(200));
        for _ in 0..10 {
            assert_eq!(clock.tick(&mut s), TickEffect::None);
        }
        assert_eq!(s.progress_secs, 200);

        // Server still reports the end: no new request.
        let mut stuck = snap(PlaybackStatus::Playing, 200, 200);
        clock.on_snapshot(&stuck);
        assert_eq!(clock.tick(&mut stuck), TickEffect::None);

        // A fresh track re-arms.
        let mut next = snap(PlaybackStatus::Playing, 199, 200);
        clock.on_snapshot(&next);
        assert_eq!(clock.tick(&mut next), TickEffect::ReachedEnd(200));
    }

    #[test]
    fn test_starting_at_the_end_requests_refresh_once() {
        let mut clock = ProgressClock::new();
        let mut s = snap(PlaybackStatus::Playing, 200, 200);
        clock.on_snapshot(&s);
        assert_eq!(clock.tick(&mut s), TickEffect::ReachedEnd(200));
        assert_eq!(clock.tick(&mut s), TickEffect::None);
    }

    #[test]
    fn test_unknown_duration_does_not_move() {
        let mut clock = ProgressClock::new();
        let mut s = snap(PlaybackStatus::Playing, 1834, 0);
        clock.on_snapshot(&s);
        assert_eq!(clock.tick(&mut s), TickEffect::None);
        assert_eq!(s.progress_secs, 1834);
    }
}
