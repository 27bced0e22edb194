use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, ORIGIN, REFERER};
use serde::de::DeserializeOwned;

use bilifetch_core::models::settings::AppSettings;

use super::models::{ApiResponse, PlayUrlData, VideoInfo, VideoStreamData};
use super::quality::FNVAL_DASH;
use crate::core::http_client;
use crate::error::{Error, Result};
use crate::storage::credentials::Credential;

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(BV[0-9A-Za-z]{10}|av\d+)\b").unwrap()
});

/// The three read calls the resolver, catalog and downloader depend on.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn get_video_info(&self, video_id: &str) -> Result<VideoInfo>;

    /// Legacy single-call manifest for the first page of a video.
    async fn get_play_url(&self, video_id: &str) -> Result<PlayUrlData>;

    async fn get_video_stream(
        &self,
        video_id: &str,
        cid: i64,
        quality: Option<u32>,
        fnval: u32,
        platform: Option<&str>,
    ) -> Result<VideoStreamData>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoId {
    Bv(String),
    Av(i64),
}

impl VideoId {
    /// Query parameter pair identifying the video.
    fn param(&self, numeric_key: &'static str) -> (&'static str, String) {
        match self {
            VideoId::Bv(bvid) => ("bvid", bvid.clone()),
            VideoId::Av(aid) => (numeric_key, aid.to_string()),
        }
    }
}

impl FromStr for VideoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::InvalidVideoId(s.to_string());
        let (prefix, rest) = match (s.get(..2), s.get(2..)) {
            (Some(p), Some(r)) if !r.is_empty() => (p, r),
            _ => return Err(invalid()),
        };
        if prefix.eq_ignore_ascii_case("bv") && rest.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(VideoId::Bv(s.to_string()));
        }
        if prefix.eq_ignore_ascii_case("av") {
            return rest.parse::<i64>().map(VideoId::Av).map_err(|_| invalid());
        }
        Err(invalid())
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoId::Bv(bvid) => f.write_str(bvid),
            VideoId::Av(aid) => write!(f, "av{}", aid),
        }
    }
}

/// Accepts a bare id or any URL containing one.
pub fn extract_video_id(input: &str) -> Result<String> {
    let input = input.trim();
    if input.parse::<VideoId>().is_ok() {
        return Ok(input.to_string());
    }
    VIDEO_ID_RE
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::InvalidVideoId(input.to_string()))
}

pub struct BilibiliClient {
    client: reqwest::Client,
    credential: Credential,
    base_url: String,
    site_url: String,
}

impl BilibiliClient {
    pub fn new(
        client: reqwest::Client,
        credential: Credential,
        base_url: impl Into<String>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            credential,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            site_url: site_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &AppSettings, credential: Credential) -> Result<Self> {
        let client = http_client::api_client_builder(settings)
            .build()
            .map_err(|e| Error::Config(format!("api client: {}", e)))?;
        Ok(Self::new(
            client,
            credential,
            settings.api.base_url.clone(),
            settings.api.site_url.clone(),
        ))
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    fn headers(&self, video_id: &str) -> Result<HeaderMap> {
        let value = |v: &str| {
            HeaderValue::from_str(v).map_err(|e| Error::transport("request headers", e))
        };
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, value(&format!("{}/video/{}", self.site_url, video_id))?);
        headers.insert(ORIGIN, value(&self.site_url)?);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        if !self.credential.cookies.is_empty() {
            headers.insert(COOKIE, value(&self.credential.cookie_header())?);
        }
        Ok(headers)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        video_id: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .headers(self.headers(video_id)?)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(path, format!("HTTP {}", status)));
        }
        let body = response.bytes().await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&body)?;
        envelope.into_data()
    }
}

#[async_trait]
impl PlatformApi for BilibiliClient {
    async fn get_video_info(&self, video_id: &str) -> Result<VideoInfo> {
        let id: VideoId = video_id.parse()?;
        let info: VideoInfo = self
            .get_json("/x/web-interface/view", video_id, &[id.param("aid")])
            .await?;
        tracing::debug!(
            "[resolver] {} is '{}' (aid {}, {} pages)",
            video_id,
            info.title,
            info.aid,
            info.pages.len()
        );
        Ok(info)
    }

    async fn get_play_url(&self, video_id: &str) -> Result<PlayUrlData> {
        let id: VideoId = video_id.parse()?;
        let info = self.get_video_info(video_id).await?;
        let cid = info
            .first_cid()
            .ok_or_else(|| Error::Decode(format!("{} has no pages", video_id)))?;

        let query = vec![
            id.param("avid"),
            ("cid", cid.to_string()),
            ("fnval", FNVAL_DASH.to_string()),
            ("fnver", "0".into()),
            ("fourk", "1".into()),
        ];
        self.get_json("/x/player/playurl", video_id, &query).await
    }

    async fn get_video_stream(
        &self,
        video_id: &str,
        cid: i64,
        quality: Option<u32>,
        fnval: u32,
        platform: Option<&str>,
    ) -> Result<VideoStreamData> {
        let id: VideoId = video_id.parse()?;
        let mut query = vec![
            id.param("avid"),
            ("cid", cid.to_string()),
            ("fnval", fnval.to_string()),
            ("fnver", "0".into()),
            ("fourk", "1".into()),
            ("otype", "json".into()),
        ];
        if let Some(q) = quality.filter(|q| *q > 0) {
            query.push(("qn", q.to_string()));
        }
        if let Some(p) = platform.filter(|p| !p.is_empty()) {
            query.push(("platform", p.to_string()));
        }
        if self.credential.has_session() {
            query.push(("try_look", "1".into()));
        }
        self.get_json("/x/player/wbi/playurl", video_id, &query).await
    }
}
