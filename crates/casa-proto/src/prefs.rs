//! Client-local preferences (selected zone, theme, panels).
//!
//! A `PreferenceStore` is handed to whoever needs preferences; there is no
//! global settings object.  `load` merges whatever is on disk over the
//! defaults field by field, so files written by older versions keep working.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_THEME: &str = "Basic Black";

/// Cosmetic layers a theme switches on.  Only `canvas` affects the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeConfig {
    pub name: &'static str,
    pub diffused_background: bool,
    pub kaleidoscope_background: bool,
    pub canvas: bool,
}

pub const THEMES: &[ThemeConfig] = &[
    ThemeConfig {
        name: "Basic Black",
        diffused_background: false,
        kaleidoscope_background: false,
        canvas: false,
    },
    ThemeConfig {
        name: "Robust",
        diffused_background: true,
        kaleidoscope_background: false,
        canvas: false,
    },
    ThemeConfig {
        name: "Live",
        diffused_background: true,
        kaleidoscope_background: false,
        canvas: true,
    },
    ThemeConfig {
        name: "Kaleidoscope",
        diffused_background: false,
        kaleidoscope_background: true,
        canvas: false,
    },
];

/// Look a theme up by name, case-insensitively.  Unknown names get the default theme.
pub fn theme(name: &str) -> &'static ThemeConfig {
    THEMES
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(name))
        .unwrap_or(&THEMES[0])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub selected_zone: Option<String>,
    pub theme: String,
    pub show_streaming_links: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            selected_zone: None,
            theme: DEFAULT_THEME.to_string(),
            show_streaming_links: false,
        }
    }
}

impl Preferences {
    pub fn theme(&self) -> &'static ThemeConfig {
        theme(&self.theme)
    }

    pub fn canvas_enabled(&self) -> bool {
        self.theme().canvas
    }
}

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored preferences merged over defaults.  A missing file is not an
    /// error; a corrupt one is logged and ignored.
    pub fn load(&self) -> Preferences {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Preferences::default(),
        };
        match serde_json::from_str::<Preferences>(&content) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("Ignoring unreadable preferences {}: {}", self.path.display(), e);
                Preferences::default()
            }
        }
    }

    pub fn save(&self, prefs: &Preferences) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(prefs)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Load, apply `f`, save.  Returns the saved value.
    pub fn update(&self, f: impl FnOnce(&mut Preferences)) -> anyhow::Result<Preferences> {
        let mut prefs = self.load();
        f(&mut prefs);
        self.save(&prefs)?;
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, r#"{"selected_zone":"Kitchen","legacy_flag":true}"#).unwrap();
        let prefs = PreferenceStore::new(&path).load();
        assert_eq!(prefs.selected_zone.as_deref(), Some("Kitchen"));
        assert_eq!(prefs.theme, DEFAULT_THEME);
        assert!(!prefs.show_streaming_links);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(PreferenceStore::new(&path).load(), Preferences::default());
    }

    #[test]
    fn test_update_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("nested").join("prefs.json"));
        store
            .update(|p| {
                p.theme = "live".to_string();
                p.selected_zone = Some("Patio".to_string());
            })
            .unwrap();
        let prefs = store.load();
        assert_eq!(prefs.selected_zone.as_deref(), Some("Patio"));
        assert!(prefs.canvas_enabled());
    }

    #[test]
    fn test_unknown_theme_falls_back() {
        assert_eq!(theme("Neon").name, DEFAULT_THEME);
        assert!(theme("LIVE").canvas);
    }
}
