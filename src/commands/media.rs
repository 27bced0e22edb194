use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use bilifetch_core::models::media::{DownloadOptions, DownloadResult, MediaType, QualityInfo};

use crate::core::rate_limiter::OperationKey;
use crate::error::{Error, Result};
use crate::platforms::bilibili::api::{extract_video_id, BilibiliClient, PlatformApi};
use crate::platforms::bilibili::catalog;
use crate::platforms::bilibili::models::DashStream;
use crate::platforms::bilibili::quality::{quality_label, FNVAL_DASH, PLATFORM_HTML5};
use crate::platforms::bilibili::resolver::guarded;
use crate::platforms::bilibili::MediaDownloadService;
use crate::storage::credentials::Credential;
use crate::AppState;

const ANONYMOUS_KEY: &str = "default";
const USAGE_NOTE: &str = "stream URLs expire after a while and are only served with the same \
Referer (https://www.bilibili.com/video/<id>) and User-Agent headers";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Bare id or video URL.
    pub video: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub quality: Option<u32>,
    #[serde(default)]
    pub cid: Option<i64>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualitiesRequest {
    pub video: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub cid: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamRequest {
    pub video: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub cid: Option<i64>,
    #[serde(default)]
    pub quality: Option<u32>,
    #[serde(default)]
    pub fnval: Option<u32>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackUrl {
    pub id: u32,
    pub label: String,
    pub url: String,
    pub backup_urls: Vec<String>,
    pub bandwidth: u64,
    pub codecs: String,
    pub width: u32,
    pub height: u32,
}

impl From<&DashStream> for TrackUrl {
    fn from(track: &DashStream) -> Self {
        Self {
            id: track.id,
            label: quality_label(track.id),
            url: track.base_url.clone(),
            backup_urls: track.backup_url.clone(),
            bandwidth: track.bandwidth,
            codecs: track.codecs.clone(),
            width: track.width,
            height: track.height,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub video_id: String,
    pub cid: i64,
    pub quality: u32,
    pub quality_label: String,
    pub format: String,
    pub duration_secs: u64,
    pub accept_quality: Vec<u32>,
    pub video: Vec<TrackUrl>,
    pub audio: Vec<TrackUrl>,
    pub durl: Vec<String>,
    pub usage_note: String,
}

fn account_key(account: Option<&str>) -> String {
    account
        .filter(|a| !a.is_empty())
        .unwrap_or(ANONYMOUS_KEY)
        .to_string()
}

/// Reads the account's cookies out of a pooled browser context. The session is
/// torn down before returning so the context goes back to the pool. Waiting for
/// a free context gives up as soon as `cancel` fires.
pub async fn acquire_credential(
    state: &AppState,
    cancel: &CancellationToken,
    account: Option<&str>,
) -> Result<Credential> {
    let mut session = guarded(cancel, state.pool.create_authenticated_session(account)).await?;
    let credential = guarded(cancel, session.credential()).await;
    let account = session.account().to_string();
    if let Err(e) = session.close().await {
        tracing::warn!("[session] closing session for '{}' failed: {}", account, e);
    }
    credential
}

async fn api_for(
    state: &AppState,
    cancel: &CancellationToken,
    account: Option<&str>,
) -> Result<Arc<dyn PlatformApi>> {
    let credential = acquire_credential(state, cancel, account).await?;
    Ok(Arc::new(BilibiliClient::from_settings(
        &state.settings,
        credential,
    )?))
}

async fn resolve_cid(
    cancel: &CancellationToken,
    api: &dyn PlatformApi,
    video_id: &str,
    cid: Option<i64>,
) -> Result<i64> {
    if let Some(cid) = cid.filter(|c| *c > 0) {
        return Ok(cid);
    }
    let info = guarded(cancel, api.get_video_info(video_id)).await?;
    info.first_cid()
        .ok_or_else(|| Error::resolution(video_id, 0, "video has no cid"))
}

pub async fn download_media(
    state: &AppState,
    cancel: &CancellationToken,
    request: DownloadRequest,
) -> Result<DownloadResult> {
    let video_id = extract_video_id(&request.video)?;
    let account = request.account.as_deref();
    state.rate_limiter.check(
        &OperationKey::new("download_media", account_key(account), &video_id),
        Duration::from_secs(state.settings.rate_limit.download_interval_secs),
    )?;

    let api = api_for(state, cancel, account).await?;
    let output_dir = request
        .output_dir
        .clone()
        .unwrap_or_else(|| state.settings.download.output_dir.clone());
    let service = MediaDownloadService::new(api, state.transfer_engine(), output_dir)
        .with_settings(&state.settings.download);

    let options = DownloadOptions {
        media_type: request.media_type,
        quality: request.quality,
        cid: request.cid,
    };
    let result = service.download(cancel, &video_id, &options).await?;
    tracing::info!(
        "[download] {} finished at {} ({})",
        video_id,
        result.quality_label,
        result.notes.join("; ")
    );
    Ok(result)
}

pub async fn list_qualities(
    state: &AppState,
    cancel: &CancellationToken,
    request: QualitiesRequest,
) -> Result<Vec<QualityInfo>> {
    let video_id = extract_video_id(&request.video)?;
    let api = api_for(state, cancel, request.account.as_deref()).await?;
    let cid = resolve_cid(cancel, api.as_ref(), &video_id, request.cid).await?;
    catalog::enumerate(cancel, api.as_ref(), &video_id, cid).await
}

pub async fn get_video_stream(
    state: &AppState,
    cancel: &CancellationToken,
    request: StreamRequest,
) -> Result<StreamInfo> {
    let video_id = extract_video_id(&request.video)?;
    let account = request.account.as_deref();
    state.rate_limiter.check(
        &OperationKey::new("get_video_stream", account_key(account), &video_id),
        Duration::from_secs(state.settings.rate_limit.stream_interval_secs),
    )?;

    let api = api_for(state, cancel, account).await?;
    let cid = resolve_cid(cancel, api.as_ref(), &video_id, request.cid).await?;
    let platform = request.platform.as_deref().unwrap_or(PLATFORM_HTML5);
    let data = guarded(
        cancel,
        api.get_video_stream(
            &video_id,
            cid,
            request.quality,
            request.fnval.unwrap_or(FNVAL_DASH),
            Some(platform),
        ),
    )
    .await?;

    let (video, audio) = match &data.dash {
        Some(dash) => (
            dash.video.iter().map(TrackUrl::from).collect(),
            dash.audio.iter().map(TrackUrl::from).collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };
    Ok(StreamInfo {
        video_id,
        cid,
        quality: data.quality,
        quality_label: quality_label(data.quality),
        format: data.format,
        duration_secs: data.timelength / 1000,
        accept_quality: data.accept_quality,
        video,
        audio,
        durl: data.durl.into_iter().map(|s| s.url).collect(),
        usage_note: USAGE_NOTE.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_requests_share_a_key() {
        assert_eq!(account_key(None), "default");
        assert_eq!(account_key(Some("")), "default");
        assert_eq!(account_key(Some("alice")), "alice");
    }

    #[test]
    fn download_request_defaults_to_merged() {
        let req: DownloadRequest = serde_json::from_str(r#"{"video":"BV1xx411c7mD"}"#).unwrap();
        assert_eq!(req.media_type, MediaType::Merged);
        assert!(req.quality.is_none());
    }
}
