use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

/// Environment override for `[api] base_url`.
pub const API_BASE_ENV: &str = "CASA_API_BASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Cadence of the now-playing poller.  All values in milliseconds unless the
/// name says otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_playing_interval_ms")]
    pub playing_interval_ms: u64,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Interval used once the track is within `near_end_threshold_secs` of its end.
    #[serde(default = "default_near_end_interval_ms")]
    pub near_end_interval_ms: u64,
    #[serde(default = "default_near_end_threshold_secs")]
    pub near_end_threshold_secs: u32,
    /// Floor applied while the host reports the view as hidden.
    #[serde(default = "default_hidden_interval_ms")]
    pub hidden_interval_ms: u64,
    #[serde(default = "default_max_backoff_factor")]
    pub max_backoff_factor: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Delay before the refresh fired when extrapolated progress hits the duration.
    #[serde(default = "default_end_of_track_refresh_ms")]
    pub end_of_track_refresh_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Lifetime of the transient control-failure notice.
    #[serde(default = "default_notice_ttl_ms")]
    pub notice_ttl_ms: u64,
    #[serde(default = "default_volume_debounce_ms")]
    pub volume_debounce_ms: u64,
    /// Volume restored on unmute when no earlier non-zero level is known.
    #[serde(default = "default_mute_restore_volume")]
    pub mute_restore_volume: u8,
    #[serde(default = "default_play_pause_follow_ups_ms")]
    pub play_pause_follow_ups_ms: Vec<u64>,
    #[serde(default = "default_skip_follow_ups_ms")]
    pub skip_follow_ups_ms: Vec<u64>,
    #[serde(default = "default_intent_timeout_ms")]
    pub intent_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Canvas lookup endpoint; lookups are disabled when unset.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Video shown when a track has no canvas.
    #[serde(default)]
    pub default_video: Option<String>,
    /// Scheme prefix of deep links carrying the streaming track id.
    #[serde(default = "default_streaming_service")]
    pub streaming_service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_preferences_file")]
    pub preferences_file: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            playing_interval_ms: default_playing_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            near_end_interval_ms: default_near_end_interval_ms(),
            near_end_threshold_secs: default_near_end_threshold_secs(),
            hidden_interval_ms: default_hidden_interval_ms(),
            max_backoff_factor: default_max_backoff_factor(),
            max_interval_ms: default_max_interval_ms(),
            end_of_track_refresh_ms: default_end_of_track_refresh_ms(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            notice_ttl_ms: default_notice_ttl_ms(),
            volume_debounce_ms: default_volume_debounce_ms(),
            mute_restore_volume: default_mute_restore_volume(),
            play_pause_follow_ups_ms: default_play_pause_follow_ups_ms(),
            skip_follow_ups_ms: default_skip_follow_ups_ms(),
            intent_timeout_ms: default_intent_timeout_ms(),
        }
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            default_video: None,
            streaming_service: default_streaming_service(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            preferences_file: default_preferences_file(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PollingConfig {
    pub fn end_of_track_refresh(&self) -> Duration {
        Duration::from_millis(self.end_of_track_refresh_ms)
    }
}

impl ControlConfig {
    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }

    pub fn volume_debounce(&self) -> Duration {
        Duration::from_millis(self.volume_debounce_ms)
    }

    pub fn intent_timeout(&self) -> Duration {
        Duration::from_millis(self.intent_timeout_ms)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8735/api/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_playing_interval_ms() -> u64 {
    5_000
}

fn default_idle_interval_ms() -> u64 {
    15_000
}

fn default_near_end_interval_ms() -> u64 {
    1_500
}

fn default_near_end_threshold_secs() -> u32 {
    7
}

fn default_hidden_interval_ms() -> u64 {
    60_000
}

fn default_max_backoff_factor() -> u64 {
    32
}

fn default_max_interval_ms() -> u64 {
    120_000
}

fn default_end_of_track_refresh_ms() -> u64 {
    300
}

fn default_notice_ttl_ms() -> u64 {
    5_000
}

fn default_volume_debounce_ms() -> u64 {
    200
}

fn default_mute_restore_volume() -> u8 {
    25
}

fn default_play_pause_follow_ups_ms() -> Vec<u64> {
    vec![300, 900]
}

fn default_skip_follow_ups_ms() -> Vec<u64> {
    vec![300, 1200]
}

fn default_intent_timeout_ms() -> u64 {
    3_000
}

fn default_streaming_service() -> String {
    "spotify".to_string()
}

fn default_preferences_file() -> PathBuf {
    platform::config_dir().join("preferences.json")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        let mut config = if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            config
        } else {
            Self::load_from(&config_path)?
        };

        if let Ok(base) = std::env::var(API_BASE_ENV) {
            if !base.trim().is_empty() {
                config.api.base_url = base;
            }
        }
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
