use casa_proto::protocol::NowPlayingSnapshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{NowPlayingResponse, ZoneApi};
use crate::error::SyncError;

/// Outcome of one conditional now-playing fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// 304; keep the snapshot and validator we have.
    Unchanged,
    Updated {
        snapshot: NowPlayingSnapshot,
        etag: Option<String>,
    },
    Failed(SyncError),
    /// The subscription went away while the request was in flight.
    Cancelled,
}

/// Issue a single `GET /zones/{zone}/nowplaying`, abandoning it as soon as
/// `cancel` fires.  Never retries.
pub async fn fetch_now_playing(
    api: &dyn ZoneApi,
    zone: &str,
    etag: Option<&str>,
    cancel: &CancellationToken,
) -> FetchOutcome {
    let res = tokio::select! {
        biased;
        _ = cancel.cancelled() => return FetchOutcome::Cancelled,
        res = api.now_playing(zone, etag) => res,
    };

    match res {
        Ok(NowPlayingResponse::NotModified) => {
            debug!("nowplaying {}: not modified", zone);
            FetchOutcome::Unchanged
        }
        Ok(NowPlayingResponse::Document { document, etag }) => FetchOutcome::Updated {
            snapshot: NowPlayingSnapshot::from_document(&document),
            etag,
        },
        Err(SyncError::Cancelled) => FetchOutcome::Cancelled,
        Err(e) => FetchOutcome::Failed(e),
    }
}
