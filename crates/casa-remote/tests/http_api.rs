//! HTTP client behaviour against an in-process mock zone server.
//!
//! The mock serves a single zone ("Living Room") whose now-playing document
//! carries an ETag, answers 304 when the client echoes it, records every
//! player/volume request, and hosts a canvas lookup endpoint.
//!
//! Run with: cargo test --test http_api

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use casa_proto::config::ApiConfig;
use casa_proto::protocol::{NowPlayingSnapshot, PlayerAction};
use casa_remote::api::{ExternalMedia, HttpExternalMedia, HttpZoneApi, NowPlayingResponse, ZoneApi};
use casa_remote::SyncError;
use serde_json::json;

const ETAG: &str = "\"np-1\"";

#[derive(Default)]
struct MockState {
    requests: Mutex<Vec<String>>,
}

impl MockState {
    fn log(&self, entry: String) {
        self.requests.lock().unwrap().push(entry);
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

type Shared = Arc<MockState>;

async fn now_playing(State(state): State<Shared>, Path(zone): Path<String>, headers: HeaderMap) -> Response {
    let validator = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.log(format!("nowplaying {} {:?}", zone, validator));

    if zone != "Living Room" {
        return StatusCode::NOT_FOUND.into_response();
    }
    if validator.as_deref() == Some(ETAG) {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    let body = json!({
        "Status": 2,
        "CurrProgress": 61,
        "CurrSong": {
            "Title": "Hyperballad",
            "Artists": "Björk",
            "Album": "Post",
            "Duration": 321,
            "DeepLinks": [{"Kind": "track", "Uri": "spotify:track:3ZtxTcgqZ1RzMeSclDxVoX"}]
        },
        "NextSong": {"Title": "The Modern Things", "Artists": "Björk"}
    });
    ([(header::ETAG, ETAG)], Json(body)).into_response()
}

async fn player(State(state): State<Shared>, Path((zone, action)): Path<(String, String)>) -> StatusCode {
    state.log(format!("player {} {}", zone, action));
    if action == "next" {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    }
}

async fn zone(
    State(state): State<Shared>,
    Path(zone): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match query.get("Volume") {
        Some(volume) => {
            state.log(format!("volume {} {}", zone, volume));
            StatusCode::OK.into_response()
        }
        None => Json(json!({"ZoneID": 3, "Name": zone, "Power": true, "Volume": 42})).into_response(),
    }
}

async fn zones() -> Json<serde_json::Value> {
    Json(json!([
        {"ZoneID": 3, "Name": "Living Room", "Power": true, "Volume": 42},
        {"ZoneID": 4, "Name": "Patio", "Power": false}
    ]))
}

async fn canvas(Query(query): Query<HashMap<String, String>>) -> Response {
    match query.get("track").map(String::as_str) {
        Some("3ZtxTcgqZ1RzMeSclDxVoX") => Json(json!({
            "canvasUrl": "https://canvas.example/3ZtxTcgqZ1RzMeSclDxVoX.mp4",
            "canvasId": "c-1"
        }))
        .into_response(),
        Some("plain") => (
            [(header::CONTENT_TYPE, "text/plain")],
            "https://canvas.example/v.mp4?track=plain",
        )
            .into_response(),
        Some("broken") => (
            [(header::CONTENT_TYPE, "application/json")],
            "{definitely not json",
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start_mock() -> (String, Shared) {
    let state: Shared = Arc::new(MockState::default());
    let app = Router::new()
        .route("/api/v1/zones", get(zones))
        .route("/api/v1/zones/:zone", get(zone))
        .route("/api/v1/zones/:zone/nowplaying", get(now_playing))
        .route("/api/v1/zones/:zone/player/:action", get(player))
        .route("/canvas", get(canvas))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn api_config(base: &str) -> ApiConfig {
    ApiConfig {
        base_url: format!("{}/api/v1", base),
        ..ApiConfig::default()
    }
}

#[tokio::test]
async fn conditional_fetch_round_trip() {
    let (base, state) = start_mock().await;
    let api = HttpZoneApi::new(&api_config(&base)).unwrap();

    let first = api.now_playing("Living Room", None).await.unwrap();
    let etag = match first {
        NowPlayingResponse::Document { document, etag } => {
            let snap = NowPlayingSnapshot::from_document(&document);
            assert_eq!(snap.progress_secs, 61);
            assert_eq!(snap.current_track.as_ref().unwrap().title, "Hyperballad");
            assert_eq!(snap.next_track.as_ref().unwrap().title, "The Modern Things");
            etag
        }
        NowPlayingResponse::NotModified => panic!("first fetch cannot be 304"),
    };
    assert_eq!(etag.as_deref(), Some(ETAG));

    let second = api.now_playing("Living Room", etag.as_deref()).await.unwrap();
    assert!(matches!(second, NowPlayingResponse::NotModified));

    assert_eq!(
        state.requests(),
        vec![
            "nowplaying Living Room None".to_string(),
            format!("nowplaying Living Room Some({:?})", ETAG),
        ]
    );
}

#[tokio::test]
async fn unknown_zone_is_http_error() {
    let (base, _state) = start_mock().await;
    let api = HttpZoneApi::new(&api_config(&base)).unwrap();
    let err = api.now_playing("Garage", None).await.unwrap_err();
    assert_eq!(
        err,
        SyncError::Http {
            status: 404,
            reason: "Not Found".into()
        }
    );
}

#[tokio::test]
async fn player_actions_and_volume() {
    let (base, state) = start_mock().await;
    let api = HttpZoneApi::new(&api_config(&base)).unwrap();

    api.player_action("Living Room", PlayerAction::Pause).await.unwrap();
    api.player_action("Living Room", PlayerAction::Previous).await.unwrap();
    let err = api.player_action("Living Room", PlayerAction::Next).await.unwrap_err();
    assert_eq!(err.control_message(), "Unauthorized (401): check API access");

    api.set_volume("Living Room", 37).await.unwrap();
    let summary = api.zone("Living Room").await.unwrap();
    assert_eq!(summary.volume_percent(), Some(42));

    assert_eq!(
        state.requests(),
        vec![
            "player Living Room pause",
            "player Living Room previous",
            "player Living Room next",
            "volume Living Room 37",
        ]
    );
}

#[tokio::test]
async fn zones_listing() {
    let (base, _state) = start_mock().await;
    let api = HttpZoneApi::new(&api_config(&base)).unwrap();
    let zones = api.zones().await.unwrap();
    assert_eq!(zones.len(), 2);
    assert_eq!(zones[0].name, "Living Room");
    assert!(!zones[1].power);
    assert_eq!(zones[1].volume_percent(), None);
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let api = HttpZoneApi::new(&api_config("http://127.0.0.1:9")).unwrap();
    let err = api.now_playing("Living Room", None).await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn canvas_lookup_shapes() {
    let (base, _state) = start_mock().await;
    let media = HttpExternalMedia::new(&ApiConfig::default()).unwrap();
    let endpoint = format!("{}/canvas", base);

    let found = media.canvas(&endpoint, "3ZtxTcgqZ1RzMeSclDxVoX").await;
    assert_eq!(
        found.url.as_deref(),
        Some("https://canvas.example/3ZtxTcgqZ1RzMeSclDxVoX.mp4")
    );
    assert_eq!(found.id.as_deref(), Some("c-1"));
    assert!(!found.not_found);

    let plain = media.canvas(&endpoint, "plain").await;
    assert_eq!(plain.id.as_deref(), Some("plain"));

    assert!(media.canvas(&endpoint, "broken").await.not_found);
    assert!(media.canvas(&endpoint, "missing").await.not_found);
}
