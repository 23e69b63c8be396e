use casa_proto::protocol::{NowPlayingSnapshot, TrackIdentity};

/// Remembers the last track identity and reports transitions once each.
///
/// Identity is textual (`title|artist|album`): two recordings sharing all three
/// fields count as the same track.
#[derive(Debug, Default)]
pub struct TrackChangeDetector {
    last: Option<TrackIdentity>,
}

impl TrackChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&TrackIdentity> {
        self.last.as_ref()
    }

    /// Feed a freshly fetched snapshot.  Returns the new identity when it
    /// differs from the recorded one.  A snapshot without an identity (no
    /// song, or no artist) clears the record so the next real track fires.
    pub fn observe(&mut self, snapshot: &NowPlayingSnapshot) -> Option<TrackIdentity> {
        let Some(identity) = snapshot.identity() else {
            self.last = None;
            return None;
        };
        if self.last.as_ref() == Some(&identity) {
            return None;
        }
        self.last = Some(identity.clone());
        Some(identity)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
