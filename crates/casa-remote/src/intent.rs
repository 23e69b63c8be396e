//! Pending-intent tracking for optimistic transport changes.
//!
//! When play or pause succeeds we flip the displayed status right away, but
//! the zone may take a while to report it.  During that window the status is
//! `Pending`; a matching server snapshot confirms it, and if none arrives in
//! time the intent times out and the engine falls back to what the server
//! last said.
//!
//! # States
//! ```text
//!  Confirmed(T)          server agrees; render normally
//!  Pending { ... }       command accepted, server not caught up yet
//!  TimedOut { ... }      waited too long; revert to `confirmed`
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Three-state wrapper for a value that may be waiting for confirmation.
#[derive(Debug, Clone)]
pub enum IntentState<T: Clone + PartialEq> {
    /// The server reported this value.
    Confirmed(T),
    /// Command accepted; waiting for a snapshot showing `intended`.
    Pending {
        intended: T,
        confirmed: T,
        since: Instant,
    },
    /// No confirmation within the timeout.
    TimedOut { intended: T, confirmed: T },
}

impl<T: Clone + PartialEq> IntentState<T> {
    pub fn new(value: T) -> Self {
        Self::Confirmed(value)
    }

    /// The value to display.
    pub fn intended(&self) -> &T {
        match self {
            Self::Confirmed(v) => v,
            Self::Pending { intended, .. } => intended,
            Self::TimedOut { intended, .. } => intended,
        }
    }

    /// The last value the server reported.
    pub fn confirmed(&self) -> &T {
        match self {
            Self::Confirmed(v) => v,
            Self::Pending { confirmed, .. } => confirmed,
            Self::TimedOut { confirmed, .. } => confirmed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Record an accepted command.  Stays `Confirmed` when the server
    /// already reports `intended`.
    pub fn set_intent(&mut self, intended: T) {
        let confirmed = self.confirmed().clone();
        if intended == confirmed {
            *self = Self::Confirmed(intended);
        } else {
            *self = Self::Pending {
                intended,
                confirmed,
                since: Instant::now(),
            };
        }
    }

    /// Check for timeout.  Returns `true` if the state changed.
    pub fn tick(&mut self, timeout: Duration) -> bool {
        if let Self::Pending {
            intended,
            confirmed,
            since,
        } = self
        {
            if since.elapsed() >= timeout {
                *self = Self::TimedOut {
                    intended: intended.clone(),
                    confirmed: confirmed.clone(),
                };
                return true;
            }
        }
        false
    }

    /// A server snapshot reported `value`.  Returns `true` if the state changed.
    pub fn on_confirmed(&mut self, value: T) -> bool {
        match self {
            Self::Pending {
                intended,
                confirmed,
                ..
            } => {
                if value == *intended {
                    *self = Self::Confirmed(value);
                    return true;
                }
                // Server hasn't caught up yet; keep waiting.
                *confirmed = value;
                false
            }
            Self::TimedOut { intended, .. } => {
                let matches = value == *intended;
                *self = Self::Confirmed(value);
                matches
            }
            Self::Confirmed(v) => {
                if *v != value {
                    *self = Self::Confirmed(value);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Drop any outstanding intent and accept `value` as confirmed.
    pub fn settle(&mut self, value: T) {
        *self = Self::Confirmed(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casa_proto::protocol::PlaybackStatus;

    const TIMEOUT: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn test_pending_then_confirmed() {
        let mut s = IntentState::new(PlaybackStatus::Paused);
        s.set_intent(PlaybackStatus::Playing);
        assert!(s.is_pending());
        assert_eq!(*s.intended(), PlaybackStatus::Playing);
        assert_eq!(*s.confirmed(), PlaybackStatus::Paused);

        // Stale snapshot: still paused.
        assert!(!s.on_confirmed(PlaybackStatus::Paused));
        assert!(s.is_pending());

        assert!(s.on_confirmed(PlaybackStatus::Playing));
        assert!(!s.is_pending());
        assert_eq!(*s.confirmed(), PlaybackStatus::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_and_reverts() {
        let mut s = IntentState::new(PlaybackStatus::Playing);
        s.set_intent(PlaybackStatus::Paused);
        tokio::time::advance(Duration::from_millis(2999)).await;
        assert!(!s.tick(TIMEOUT));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(s.tick(TIMEOUT));
        assert!(matches!(s, IntentState::TimedOut { .. }));
        assert_eq!(*s.confirmed(), PlaybackStatus::Playing);

        // Whatever the server says next wins.
        s.on_confirmed(PlaybackStatus::Playing);
        assert_eq!(*s.intended(), PlaybackStatus::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intent_matching_confirmed_is_immediate() {
        let mut s = IntentState::new(PlaybackStatus::Playing);
        s.set_intent(PlaybackStatus::Playing);
        assert!(!s.is_pending());
        assert!(!s.tick(TIMEOUT));
    }
}
