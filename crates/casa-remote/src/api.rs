//! Boundary to the zone HTTP API and the external media services.
//!
//! The engine only talks to these traits; `HttpZoneApi` and
//! `HttpExternalMedia` are the production implementations.

use async_trait::async_trait;
use casa_proto::config::ApiConfig;
use casa_proto::protocol::{NowPlayingDocument, PlayerAction, ZoneSummary};
use reqwest::header::{HeaderValue, ETAG, IF_NONE_MATCH};
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::canvas::{self, CanvasMeta};
use crate::error::{SyncError, SyncResult};

const USER_AGENT: &str = concat!("casa-remote/", env!("CARGO_PKG_VERSION"));

/// Result of a conditional now-playing request.
#[derive(Debug, Clone)]
pub enum NowPlayingResponse {
    /// 304: the validator still matches.
    NotModified,
    Document {
        document: NowPlayingDocument,
        etag: Option<String>,
    },
}

#[async_trait]
pub trait ZoneApi: Send + Sync {
    /// `GET /zones/{zone}/nowplaying`, conditional on `etag` when given.
    async fn now_playing(&self, zone: &str, etag: Option<&str>) -> SyncResult<NowPlayingResponse>;

    /// `GET /zones/{zone}/player/{action}`; the body is ignored.
    async fn player_action(&self, zone: &str, action: PlayerAction) -> SyncResult<()>;

    /// `GET /zones/{zone}?Volume={volume}`.
    async fn set_volume(&self, zone: &str, volume: u8) -> SyncResult<()>;

    /// `GET /zones/{zone}`, used to read the current volume on demand.
    async fn zone(&self, zone: &str) -> SyncResult<ZoneSummary>;

    /// `GET /zones`.
    async fn zones(&self) -> SyncResult<Vec<ZoneSummary>>;
}

#[async_trait]
pub trait ExternalMedia: Send + Sync {
    /// Canvas lookup for a streaming track id.  Never fails: any error is
    /// reported as "no canvas".
    async fn canvas(&self, endpoint: &str, track_id: &str) -> CanvasMeta;

    /// Raw artwork bytes for palette extraction.
    async fn artwork(&self, uri: &str) -> SyncResult<Vec<u8>>;
}

fn build_client(config: &ApiConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.request_timeout())
        .build()?)
}

// ── Zone API ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpZoneApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpZoneApi {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let base = Url::parse(config.base_url.trim())?;
        if base.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry a path: {}", base);
        }
        Ok(Self {
            client: build_client(config)?,
            base,
        })
    }

    /// `base` + percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_ok(&self, url: Url) -> SyncResult<reqwest::Response> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::http(resp.status()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ZoneApi for HttpZoneApi {
    async fn now_playing(&self, zone: &str, etag: Option<&str>) -> SyncResult<NowPlayingResponse> {
        let url = self.endpoint(&["zones", zone, "nowplaying"]);
        let mut req = self.client.get(url);
        if let Some(tag) = etag.and_then(|t| HeaderValue::from_str(t).ok()) {
            req = req.header(IF_NONE_MATCH, tag);
        }

        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(NowPlayingResponse::NotModified);
        }
        if !resp.status().is_success() {
            return Err(SyncError::http(resp.status()));
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await?;
        let document = serde_json::from_str(&body)?;
        Ok(NowPlayingResponse::Document { document, etag })
    }

    async fn player_action(&self, zone: &str, action: PlayerAction) -> SyncResult<()> {
        let url = self.endpoint(&["zones", zone, "player", action.as_str()]);
        debug!("Control request: {}", url);
        self.get_ok(url).await?;
        Ok(())
    }

    async fn set_volume(&self, zone: &str, volume: u8) -> SyncResult<()> {
        let mut url = self.endpoint(&["zones", zone]);
        url.query_pairs_mut()
            .append_pair("Volume", &volume.min(100).to_string());
        self.get_ok(url).await?;
        Ok(())
    }

    async fn zone(&self, zone: &str) -> SyncResult<ZoneSummary> {
        let resp = self.get_ok(self.endpoint(&["zones", zone])).await?;
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn zones(&self) -> SyncResult<Vec<ZoneSummary>> {
        let resp = self.get_ok(self.endpoint(&["zones"])).await?;
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

// ── Canvas + artwork ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpExternalMedia {
    client: reqwest::Client,
}

impl HttpExternalMedia {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }

    async fn try_canvas(&self, endpoint: &str, track_id: &str) -> SyncResult<CanvasMeta> {
        let url = canvas::lookup_url(endpoint, track_id)?;
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::http(resp.status()));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = resp.text().await?;
        canvas::parse_canvas_body(&content_type, &body)
    }
}

#[async_trait]
impl ExternalMedia for HttpExternalMedia {
    async fn canvas(&self, endpoint: &str, track_id: &str) -> CanvasMeta {
        match self.try_canvas(endpoint, track_id).await {
            Ok(meta) => meta,
            Err(e) => {
                debug!("Canvas lookup for {} failed: {}", track_id, e);
                CanvasMeta::not_found()
            }
        }
    }

    async fn artwork(&self, uri: &str) -> SyncResult<Vec<u8>> {
        let resp = self.client.get(uri).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::http(resp.status()));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
