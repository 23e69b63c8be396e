use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// `Status` code the zone API reports while a track is playing.
pub const STATUS_PLAYING: i64 = 2;
/// `Status` code the zone API reports while paused.
pub const STATUS_PAUSED: i64 = 1;

// ── Wire documents ────────────────────────────────────────────────────────────

/// `GET /zones/{zone}/nowplaying` as served by the zone API.
///
/// Only `CurrSong.Title` is mandatory.  Lookahead entries (`NextSong`, `Queue`,
/// `PlayQueue`) are best-effort: a malformed entry is dropped instead of
/// failing the whole document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NowPlayingDocument {
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub curr_progress: Option<f64>,
    #[serde(default)]
    pub curr_song: Option<SongDocument>,
    #[serde(default, deserialize_with = "lenient_song")]
    pub next_song: Option<SongDocument>,
    #[serde(default, deserialize_with = "lenient_songs")]
    pub queue: Option<Vec<SongDocument>>,
    #[serde(default, deserialize_with = "lenient_songs")]
    pub play_queue: Option<Vec<SongDocument>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SongDocument {
    pub title: String,
    #[serde(default)]
    pub artists: Option<String>,
    /// Some API versions use the singular form.
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration: Option<f64>,
    #[serde(default, rename = "ArtworkURI")]
    pub artwork_uri: Option<String>,
    #[serde(default)]
    pub deep_links: Option<Vec<DeepLinkDocument>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeepLinkDocument {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// One entry of `GET /zones`, also the shape of `GET /zones/{zone}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZoneSummary {
    #[serde(default, rename = "ZoneID")]
    pub zone_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub power: bool,
    #[serde(default)]
    pub volume: Option<i64>,
}

impl ZoneSummary {
    /// Volume clamped into the 0..=100 range the slider works with.
    pub fn volume_percent(&self) -> Option<u8> {
        self.volume.map(|v| v.clamp(0, 100) as u8)
    }
}

fn lenient_song<'de, D>(deserializer: D) -> Result<Option<SongDocument>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn lenient_songs<'de, D>(deserializer: D) -> Result<Option<Vec<SongDocument>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
        ),
        _ => None,
    })
}

// ── Domain model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Paused,
    Playing,
}

impl PlaybackStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            STATUS_PLAYING => Self::Playing,
            STATUS_PAUSED => Self::Paused,
            _ => Self::Stopped,
        }
    }

    pub fn is_playing(self) -> bool {
        self == Self::Playing
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Playing => "playing",
        }
    }
}

/// Transport commands accepted by `GET /zones/{zone}/player/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerAction {
    Play,
    Pause,
    Next,
    Previous,
}

impl PlayerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Next => "next",
            Self::Previous => "previous",
        }
    }

    /// Status the zone should reach once the action lands, for play/pause.
    pub fn expected_status(self) -> Option<PlaybackStatus> {
        match self {
            Self::Play => Some(PlaybackStatus::Playing),
            Self::Pause => Some(PlaybackStatus::Paused),
            Self::Next | Self::Previous => None,
        }
    }
}

impl fmt::Display for PlayerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub kind: String,
    pub uri: String,
}

/// Streaming-service URIs attached to a track, first of each kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingLinks {
    pub track: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub playlist: Option<String>,
}

impl StreamingLinks {
    pub fn is_empty(&self) -> bool {
        self.track.is_none() && self.artist.is_none() && self.album.is_none() && self.playlist.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    /// `Artists`, falling back to `Artist`.
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: u32,
    pub artwork_uri: Option<String>,
    pub external_links: Vec<ExternalLink>,
}

impl Track {
    pub fn from_document(song: &SongDocument) -> Self {
        let artist = song
            .artists
            .clone()
            .filter(|a| !a.trim().is_empty())
            .or_else(|| song.artist.clone());
        let external_links = song
            .deep_links
            .iter()
            .flatten()
            .filter_map(|link| match (&link.kind, &link.uri) {
                (Some(kind), Some(uri)) if !kind.is_empty() && !uri.is_empty() => {
                    Some(ExternalLink {
                        kind: kind.clone(),
                        uri: uri.clone(),
                    })
                }
                _ => None,
            })
            .collect();

        Self {
            title: song.title.clone(),
            artist,
            album: song.album.clone(),
            duration_secs: song.duration.map(whole_secs).unwrap_or(0),
            artwork_uri: song.artwork_uri.clone().filter(|u| !u.is_empty()),
            external_links,
        }
    }

    pub fn artist_display(&self) -> &str {
        self.artist.as_deref().unwrap_or("")
    }

    /// Track id of the first `track` link shaped `<service>:track:<id>`.
    pub fn external_track_id(&self, service: &str) -> Option<String> {
        self.external_links
            .iter()
            .filter(|link| link.kind.eq_ignore_ascii_case("track"))
            .find_map(|link| {
                let parts: Vec<&str> = link.uri.split(':').collect();
                match parts.as_slice() {
                    [svc, "track", id] if *svc == service && !id.is_empty() => Some(id.to_string()),
                    _ => None,
                }
            })
    }

    pub fn streaming_links(&self, service: &str) -> StreamingLinks {
        let prefix = format!("{}:", service);
        let mut links = StreamingLinks::default();
        for link in &self.external_links {
            if !link.uri.starts_with(&prefix) {
                continue;
            }
            let slot = match link.kind.to_ascii_lowercase().as_str() {
                "track" => &mut links.track,
                "artist" => &mut links.artist,
                "album" => &mut links.album,
                "playlist" => &mut links.playlist,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(link.uri.clone());
            }
        }
        links
    }
}

/// Equality key for "is this still the same song".
///
/// Two recordings with identical title, artist and album are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackIdentity(String);

impl TrackIdentity {
    pub fn of(track: &Track) -> Option<Self> {
        let title = track.title.trim();
        let artist = track.artist.as_deref().map(str::trim).unwrap_or("");
        if title.is_empty() || artist.is_empty() {
            return None;
        }
        Some(Self(format!(
            "{}|{}|{}",
            track.title,
            track.artist_display(),
            track.album.as_deref().unwrap_or("")
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The client's belief about what a zone is playing.
///
/// Replaced wholesale on every successful fetch; only `progress_secs` is
/// advanced locally between fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlayingSnapshot {
    pub status: PlaybackStatus,
    pub progress_secs: u32,
    pub current_track: Option<Track>,
    pub next_track: Option<Track>,
}

impl NowPlayingSnapshot {
    pub fn from_document(doc: &NowPlayingDocument) -> Self {
        let current_track = doc.curr_song.as_ref().map(Track::from_document);
        let next_track = doc
            .next_song
            .as_ref()
            .or_else(|| doc.queue.as_ref().and_then(|q| q.get(1)))
            .or_else(|| doc.play_queue.as_ref().and_then(|q| q.get(1)))
            .map(Track::from_document);

        let mut progress_secs = doc.curr_progress.map(whole_secs).unwrap_or(0);
        if let Some(duration) = current_track.as_ref().map(|t| t.duration_secs) {
            if duration > 0 {
                progress_secs = progress_secs.min(duration);
            }
        }

        Self {
            status: PlaybackStatus::from_code(doc.status.unwrap_or(0)),
            progress_secs,
            current_track,
            next_track,
        }
    }

    /// Declared duration of the current track, 0 when unknown.
    pub fn duration_secs(&self) -> u32 {
        self.current_track.as_ref().map(|t| t.duration_secs).unwrap_or(0)
    }

    /// Seconds left in the current track; `None` when the duration is unknown.
    pub fn remaining_secs(&self) -> Option<u32> {
        match self.duration_secs() {
            0 => None,
            d => Some(d.saturating_sub(self.progress_secs)),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.status.is_playing()
    }

    pub fn identity(&self) -> Option<TrackIdentity> {
        self.current_track.as_ref().and_then(TrackIdentity::of)
    }
}

fn whole_secs(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round().min(u32::MAX as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "Status": 2,
        "CurrProgress": 42,
        "CurrSong": {
            "Title": "Teardrop",
            "Artists": "Massive Attack",
            "Album": "Mezzanine",
            "Duration": 330,
            "ArtworkURI": "http://art/teardrop.jpg",
            "DeepLinks": [
                {"Kind": "Artist", "Uri": "spotify:artist:6FXMGgJwohJLUSr5nVlf9X"},
                {"Kind": "Track", "Uri": "spotify:track:67Hna13dNDkZvBpTXRIaOJ"}
            ]
        },
        "Queue": [
            {"Title": "Teardrop", "Artists": "Massive Attack"},
            {"Title": "Inertia Creeps", "Artists": "Massive Attack"}
        ],
        "ZoneName": "Kitchen"
    }"#;

    fn track(title: &str, artist: &str, album: &str) -> Track {
        Track {
            title: title.to_string(),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            duration_secs: 200,
            artwork_uri: None,
            external_links: Vec::new(),
        }
    }

    #[test]
    fn test_snapshot_from_document() {
        let doc: NowPlayingDocument = serde_json::from_str(DOCUMENT).unwrap();
        let snap = NowPlayingSnapshot::from_document(&doc);
        assert_eq!(snap.status, PlaybackStatus::Playing);
        assert_eq!(snap.progress_secs, 42);
        assert_eq!(snap.duration_secs(), 330);
        assert_eq!(snap.remaining_secs(), Some(288));
        let current = snap.current_track.as_ref().unwrap();
        assert_eq!(current.artist_display(), "Massive Attack");
        assert_eq!(current.artwork_uri.as_deref(), Some("http://art/teardrop.jpg"));
        assert_eq!(
            current.external_track_id("spotify").as_deref(),
            Some("67Hna13dNDkZvBpTXRIaOJ")
        );
        assert_eq!(snap.next_track.unwrap().title, "Inertia Creeps");
    }

    #[test]
    fn test_missing_title_is_rejected() {
        let err = serde_json::from_str::<NowPlayingDocument>(r#"{"Status":2,"CurrSong":{"Artists":"X"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_malformed_lookahead_is_dropped() {
        let doc: NowPlayingDocument = serde_json::from_str(
            r#"{"Status":1,"CurrSong":{"Title":"A","Artist":"B"},"NextSong":{"Artists":"nobody"},"PlayQueue":[{"Title":"A"},{"Title":"C","Artist":"D"}]}"#,
        )
        .unwrap();
        let snap = NowPlayingSnapshot::from_document(&doc);
        assert_eq!(snap.status, PlaybackStatus::Paused);
        assert_eq!(snap.current_track.as_ref().unwrap().artist_display(), "B");
        assert_eq!(snap.next_track.unwrap().title, "C");
    }

    #[test]
    fn test_progress_clamped_to_duration() {
        let doc: NowPlayingDocument = serde_json::from_str(
            r#"{"Status":2,"CurrProgress":250.4,"CurrSong":{"Title":"A","Artists":"B","duration":200}}"#,
        )
        .unwrap();
        let snap = NowPlayingSnapshot::from_document(&doc);
        assert_eq!(snap.progress_secs, 200);
        assert_eq!(snap.remaining_secs(), Some(0));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PlaybackStatus::from_code(2), PlaybackStatus::Playing);
        assert_eq!(PlaybackStatus::from_code(1), PlaybackStatus::Paused);
        assert_eq!(PlaybackStatus::from_code(0), PlaybackStatus::Stopped);
        assert_eq!(PlaybackStatus::from_code(7), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_identity_equality() {
        let a = TrackIdentity::of(&track("A", "B", "")).unwrap();
        let again = TrackIdentity::of(&track("A", "B", "")).unwrap();
        let other_album = TrackIdentity::of(&track("A", "B", "C")).unwrap();
        assert_eq!(a, again);
        assert_ne!(a, other_album);
        assert_eq!(a.as_str(), "A|B|");
    }

    #[test]
    fn test_identity_requires_title_and_artist() {
        let mut t = track("A", "B", "");
        t.artist = None;
        assert!(TrackIdentity::of(&t).is_none());
        assert!(TrackIdentity::of(&track("  ", "B", "")).is_none());
    }

    #[test]
    fn test_external_track_id_requires_exact_shape() {
        let mut t = track("A", "B", "");
        t.external_links = vec![
            ExternalLink { kind: "album".into(), uri: "spotify:track:nope".into() },
            ExternalLink { kind: "track".into(), uri: "spotify:track:abc:extra".into() },
            ExternalLink { kind: "TRACK".into(), uri: "tidal:track:123".into() },
            ExternalLink { kind: "track".into(), uri: "spotify:track:xyz".into() },
        ];
        assert_eq!(t.external_track_id("spotify").as_deref(), Some("xyz"));
        assert_eq!(t.external_track_id("tidal").as_deref(), Some("123"));
    }

    #[test]
    fn test_streaming_links_first_of_each_kind() {
        let doc: NowPlayingDocument = serde_json::from_str(DOCUMENT).unwrap();
        let links = Track::from_document(doc.curr_song.as_ref().unwrap()).streaming_links("spotify");
        assert_eq!(links.track.as_deref(), Some("spotify:track:67Hna13dNDkZvBpTXRIaOJ"));
        assert_eq!(links.artist.as_deref(), Some("spotify:artist:6FXMGgJwohJLUSr5nVlf9X"));
        assert!(links.album.is_none());
        assert!(!links.is_empty());
    }
}
