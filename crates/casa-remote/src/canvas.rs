//! Canvas (looping background video) lookup results.
//!
//! Lookup services disagree on the response shape: some return a JSON object
//! with snake_case, camelCase or bare keys, others return the video URL as
//! plain text.  Everything is normalised into `CanvasMeta`.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasMeta {
    pub url: Option<String>,
    pub id: Option<String>,
    pub not_found: bool,
}

impl CanvasMeta {
    pub fn not_found() -> Self {
        Self {
            not_found: true,
            ..Self::default()
        }
    }

    /// Video to show: the canvas itself, else the configured fallback.
    pub fn video_url<'a>(&'a self, default_video: Option<&'a str>) -> Option<&'a str> {
        match (&self.url, self.not_found) {
            (Some(url), false) => Some(url.as_str()),
            _ => default_video,
        }
    }
}

/// `endpoint` with `track=<id>` appended to whatever query it already has.
pub fn lookup_url(endpoint: &str, track_id: &str) -> SyncResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| SyncError::Transport(format!("invalid canvas endpoint {}: {}", endpoint, e)))?;
    url.query_pairs_mut().append_pair("track", track_id);
    Ok(url)
}

/// Interpret a lookup response body.  A body declared as JSON that does not
/// parse is an error; anything else is interpreted leniently.
pub fn parse_canvas_body(content_type: &str, body: &str) -> SyncResult<CanvasMeta> {
    let value = if content_type.contains("application/json") {
        serde_json::from_str::<Value>(body)?
    } else {
        serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.trim().to_string()))
    };

    Ok(match value {
        Value::String(text) => from_text(&text),
        Value::Object(map) => CanvasMeta {
            url: first_string(&map, &["canvas_url", "url", "canvasUrl"]),
            id: first_string(&map, &["canvas_id", "id", "canvasId"]),
            not_found: ["canvas_not_found", "not_found", "canvasNotFound"]
                .iter()
                .any(|k| map.get(*k).is_some_and(truthy)),
        },
        _ => CanvasMeta::default(),
    })
}

fn from_text(text: &str) -> CanvasMeta {
    let text = text.trim();
    if text.is_empty() {
        return CanvasMeta::not_found();
    }
    let id = Url::parse(text)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, v)| k == "track" && !v.is_empty())
                .map(|(_, v)| v.into_owned())
        })
        .or_else(|| spotify_like_id(text));
    CanvasMeta {
        url: Some(text.to_string()),
        id,
        not_found: false,
    }
}

/// First run of 22 alphanumerics, the length of a streaming track id.
fn spotify_like_id(text: &str) -> Option<String> {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    let re = ID_RE.get_or_init(|| Regex::new(r"[A-Za-z0-9]{22}").expect("static regex"));
    re.find(text).map(|m| m.as_str().to_string())
}

fn first_string(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
