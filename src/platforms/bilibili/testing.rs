use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::api::PlatformApi;
use super::models::{
    DashInfo, DashStream, PlayUrlData, VideoInfo, VideoPage, VideoSegment, VideoStreamData,
};
use super::quality::FNVAL_MP4;
use crate::error::{Error, Result};

/// Marker recorded for a legacy manifest call.
pub const LEGACY_CALL: (u32, u32) = (0, 0);

pub fn dash_track(id: u32, height: u32) -> DashStream {
    DashStream {
        id,
        base_url: format!("https://cdn.test/video-{}.m4s", id),
        backup_url: Vec::new(),
        bandwidth: u64::from(height) * 1000,
        mime_type: "video/mp4".into(),
        codecs: "avc1.640032".into(),
        width: height * 16 / 9,
        height,
        frame_rate: "30".into(),
    }
}

pub fn audio_track(id: u32, bandwidth: u64) -> DashStream {
    DashStream {
        id,
        base_url: format!("https://cdn.test/audio-{}-{}.m4s", id, bandwidth),
        backup_url: Vec::new(),
        bandwidth,
        mime_type: "audio/mp4".into(),
        codecs: "mp4a.40.2".into(),
        width: 0,
        height: 0,
        frame_rate: String::new(),
    }
}

/// Scripted platform: which qualities exist muxed, what the split manifest
/// holds, whether the legacy endpoint answers. Every call is recorded.
#[derive(Default)]
pub struct FakeApi {
    split: Option<DashInfo>,
    muxed: Vec<u32>,
    legacy: Option<DashInfo>,
    hang_on: Option<((u32, u32), Arc<Notify>)>,
    calls: Mutex<Vec<(u32, u32)>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split(mut self, video: Vec<DashStream>, audio: Vec<DashStream>) -> Self {
        self.split = Some(DashInfo {
            duration: 120,
            video,
            audio,
        });
        self
    }

    pub fn with_muxed(mut self, qualities: &[u32]) -> Self {
        self.muxed = qualities.to_vec();
        self
    }

    pub fn with_legacy(mut self, video: Vec<DashStream>, audio: Vec<DashStream>) -> Self {
        self.legacy = Some(DashInfo {
            duration: 120,
            video,
            audio,
        });
        self
    }

    /// The stream call matching `call` never answers. `entered` is notified once
    /// it has been recorded.
    pub fn hanging_on(mut self, call: (u32, u32), entered: Arc<Notify>) -> Self {
        self.hang_on = Some((call, entered));
        self
    }

    /// `(quality, fnval)` of every stream call, in order.
    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: (u32, u32)) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl PlatformApi for FakeApi {
    async fn get_video_info(&self, video_id: &str) -> Result<VideoInfo> {
        Ok(VideoInfo {
            aid: 1,
            bvid: video_id.to_string(),
            title: "Test: Video?".into(),
            desc: String::new(),
            duration: 120,
            cid: 1,
            owner: Default::default(),
            pages: vec![VideoPage {
                cid: 1,
                page: 1,
                part: "P1".into(),
                duration: 120,
            }],
        })
    }

    async fn get_play_url(&self, _video_id: &str) -> Result<PlayUrlData> {
        self.record(LEGACY_CALL);
        self.legacy
            .clone()
            .map(|dash| PlayUrlData { dash })
            .ok_or_else(|| Error::transport("legacy playurl", "connection reset"))
    }

    async fn get_video_stream(
        &self,
        _video_id: &str,
        _cid: i64,
        quality: Option<u32>,
        fnval: u32,
        _platform: Option<&str>,
    ) -> Result<VideoStreamData> {
        let q = quality.unwrap_or_default();
        self.record((q, fnval));
        if let Some((call, entered)) = &self.hang_on {
            if *call == (q, fnval) {
                entered.notify_one();
                std::future::pending::<()>().await;
            }
        }

        if fnval == FNVAL_MP4 {
            if !self.muxed.contains(&q) {
                return Err(Error::Api {
                    code: -404,
                    message: "no muxed stream".into(),
                });
            }
            return Ok(VideoStreamData {
                quality: q,
                format: "mp4".into(),
                timelength: 120_000,
                durl: vec![VideoSegment {
                    order: 1,
                    length: 120_000,
                    size: 1024,
                    url: format!("https://cdn.test/muxed-{}.mp4", q),
                    backup_url: Vec::new(),
                }],
                ..Default::default()
            });
        }

        match &self.split {
            Some(dash) => Ok(VideoStreamData {
                quality: q,
                format: "dash".into(),
                timelength: 120_000,
                dash: Some(dash.clone()),
                ..Default::default()
            }),
            None => Err(Error::Api {
                code: -10403,
                message: "split manifest unavailable".into(),
            }),
        }
    }
}
