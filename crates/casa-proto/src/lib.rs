//! Shared types for the casa remote: the now-playing wire documents, the
//! snapshot model derived from them, configuration and persisted preferences.

pub mod config;
pub mod platform;
pub mod prefs;
pub mod protocol;
