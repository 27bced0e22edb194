use std::future::Future;

use tokio_util::sync::CancellationToken;

use bilifetch_core::models::media::{MediaType, QualityInfo, StreamCandidate};

use super::api::PlatformApi;
use super::catalog;
use super::models::{DashInfo, DashStream, StreamManifest};
use super::quality::{
    muxed_probe_order, quality_for_height, quality_label, split_target, FNVAL_DASH, FNVAL_MP4,
    PLATFORM_HTML5, Q_720P,
};
use crate::error::{Error, Result};

/// Runs one collaborator call unless `cancel` fires first.
pub(crate) async fn guarded<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        r = call => r,
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub candidate: StreamCandidate,
    pub manifest: StreamManifest,
    pub qualities: Vec<QualityInfo>,
    /// Set for split manifests when the media type needs video.
    pub video_track: Option<DashStream>,
    /// Set for split manifests when the media type needs audio.
    pub audio_track: Option<DashStream>,
}

impl Resolution {
    /// First segment of a muxed manifest.
    pub fn muxed_url(&self) -> Option<&str> {
        match &self.manifest {
            StreamManifest::Muxed { segments } => segments.first().map(|s| s.url.as_str()),
            StreamManifest::Split { .. } => None,
        }
    }
}

/// Highest bandwidth wins; on a tie the earlier track is kept.
pub fn select_audio(tracks: &[DashStream]) -> Option<&DashStream> {
    tracks.iter().fold(None, |best, track| match best {
        Some(b) if b.bandwidth >= track.bandwidth => Some(b),
        _ => Some(track),
    })
}

/// The track whose id is `target`, else the first one listed.
pub fn select_video(tracks: &[DashStream], target: u32) -> Option<&DashStream> {
    tracks
        .iter()
        .find(|t| t.id == target)
        .or_else(|| tracks.first())
}

pub struct StreamResolver<'a> {
    api: &'a dyn PlatformApi,
}

impl<'a> StreamResolver<'a> {
    pub fn new(api: &'a dyn PlatformApi) -> Self {
        Self { api }
    }

    /// Picks the representation to download for `media_type` and attaches the
    /// quality catalog of the page.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        video_id: &str,
        cid: i64,
        media_type: MediaType,
        requested: Option<u32>,
    ) -> Result<Resolution> {
        let requested = requested.filter(|q| *q > 0);
        tracing::info!(
            "[resolver] resolving {} (cid {}) as {} at {:?}",
            video_id,
            cid,
            media_type,
            requested
        );

        let muxed = if media_type == MediaType::Merged {
            self.probe_muxed(cancel, video_id, cid, requested).await?
        } else {
            None
        };
        let mut resolution = match muxed {
            Some(resolution) => resolution,
            None => self.resolve_split(cancel, video_id, cid, media_type, requested).await?,
        };

        resolution.qualities = catalog::enumerate(cancel, self.api, video_id, cid).await?;
        tracing::info!(
            "[resolver] {} -> {} ({}, has audio: {})",
            video_id,
            resolution.candidate.quality,
            resolution.candidate.description,
            resolution.candidate.has_audio
        );
        Ok(resolution)
    }

    async fn probe_muxed(
        &self,
        cancel: &CancellationToken,
        video_id: &str,
        cid: i64,
        requested: Option<u32>,
    ) -> Result<Option<Resolution>> {
        for q in muxed_probe_order(requested) {
            let probe = guarded(
                cancel,
                self.api
                    .get_video_stream(video_id, cid, Some(q), FNVAL_MP4, Some(PLATFORM_HTML5)),
            )
            .await;
            match probe {
                Ok(data) if !data.durl.is_empty() => {
                    return Ok(Some(Resolution {
                        candidate: StreamCandidate {
                            quality: q,
                            description: quality_label(q),
                            has_audio: true,
                            width: None,
                            height: None,
                        },
                        manifest: StreamManifest::Muxed {
                            segments: data.durl,
                        },
                        qualities: Vec::new(),
                        video_track: None,
                        audio_track: None,
                    }));
                }
                Ok(_) => tracing::warn!("[resolver] no muxed segments for {} at {}", video_id, q),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!("[resolver] muxed probe {} for {} failed: {}", q, video_id, e)
                }
            }
        }
        Ok(None)
    }

    async fn resolve_split(
        &self,
        cancel: &CancellationToken,
        video_id: &str,
        cid: i64,
        media_type: MediaType,
        requested: Option<u32>,
    ) -> Result<Resolution> {
        let target = split_target(requested);
        let fetched = guarded(
            cancel,
            self.api
                .get_video_stream(video_id, cid, Some(target), FNVAL_DASH, Some(PLATFORM_HTML5)),
        )
        .await;

        let (dash, quality) = match fetched {
            Ok(data) => match data.dash {
                Some(dash) => (dash, target),
                None => {
                    tracing::warn!("[resolver] {} answered without a split manifest", video_id);
                    self.legacy(cancel, video_id, target).await?
                }
            },
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(
                    "[resolver] split manifest for {} at {} failed, trying legacy endpoint: {}",
                    video_id,
                    target,
                    e
                );
                self.legacy(cancel, video_id, target).await?
            }
        };

        let video_track = if media_type == MediaType::Audio {
            None
        } else {
            let track = select_video(&dash.video, quality).cloned().ok_or_else(|| {
                Error::resolution(video_id, quality, "split manifest has no video track")
            })?;
            Some(track)
        };
        let audio_track = if media_type == MediaType::Video {
            None
        } else {
            let track = select_audio(&dash.audio).cloned().ok_or_else(|| {
                Error::resolution(video_id, quality, "split manifest has no audio track")
            })?;
            Some(track)
        };

        Ok(Resolution {
            candidate: StreamCandidate {
                quality,
                description: quality_label(quality),
                has_audio: false,
                width: video_track.as_ref().map(|t| t.width),
                height: video_track.as_ref().map(|t| t.height),
            },
            manifest: StreamManifest::Split {
                video: dash.video,
                audio: dash.audio,
            },
            qualities: Vec::new(),
            video_track,
            audio_track,
        })
    }

    /// Legacy manifest with its quality inferred from the tallest video track.
    async fn legacy(
        &self,
        cancel: &CancellationToken,
        video_id: &str,
        target: u32,
    ) -> Result<(DashInfo, u32)> {
        let data = match guarded(cancel, self.api.get_play_url(video_id)).await {
            Ok(data) => data,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                return Err(Error::resolution(
                    video_id,
                    target,
                    format!("split manifest unavailable and legacy endpoint failed: {}", e),
                ))
            }
        };
        let quality = data
            .dash
            .video
            .iter()
            .map(|t| t.height)
            .max()
            .map(quality_for_height)
            .unwrap_or(Q_720P);
        Ok((data.dash, quality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::bilibili::testing::{audio_track, dash_track, FakeApi, LEGACY_CALL};
    use std::sync::Arc;
    use tokio::sync::Notify;

    const BV: &str = "BV1xx411c7mD";

    async fn resolve(api: &FakeApi, media_type: MediaType, q: Option<u32>) -> Result<Resolution> {
        StreamResolver::new(api)
            .resolve(&CancellationToken::new(), BV, 1, media_type, q)
            .await
    }

    fn split_api() -> FakeApi {
        FakeApi::new().with_split(
            vec![dash_track(16, 360), dash_track(32, 480), dash_track(64, 720)],
            vec![audio_track(30216, 64000), audio_track(30280, 128000)],
        )
    }

    #[tokio::test]
    async fn unknown_quality_probes_default_order_then_split_at_1080p() {
        let api = split_api();
        let resolution = resolve(&api, MediaType::Merged, Some(90)).await.unwrap();

        let calls = api.calls();
        assert_eq!(
            &calls[..5],
            &[(90, 1), (64, 1), (32, 1), (16, 1), (80, 16)]
        );
        assert_eq!(resolution.candidate.quality, 80);
        assert!(!resolution.candidate.has_audio);
        // no track 80 in the manifest, first listed one is used
        assert_eq!(resolution.video_track.unwrap().id, 16);
        assert_eq!(resolution.audio_track.unwrap().bandwidth, 128000);
    }

    #[tokio::test]
    async fn muxed_720p_wins_when_no_quality_requested() {
        let api = split_api().with_muxed(&[64, 32]);
        let resolution = resolve(&api, MediaType::Merged, None).await.unwrap();

        assert_eq!(api.calls()[0], (64, 1));
        assert_eq!(resolution.candidate.quality, 64);
        assert!(resolution.candidate.has_audio);
        assert!(resolution.manifest.is_muxed());
        assert_eq!(resolution.muxed_url(), Some("https://cdn.test/muxed-64.mp4"));
        assert!(resolution.video_track.is_none());
    }

    #[tokio::test]
    async fn high_request_tries_1080p_before_720p() {
        let api = split_api().with_muxed(&[80]);
        let resolution = resolve(&api, MediaType::Merged, Some(116)).await.unwrap();
        assert_eq!(&api.calls()[..2], &[(116, 1), (80, 1)]);
        assert_eq!(resolution.candidate.quality, 80);
    }

    #[tokio::test]
    async fn video_request_skips_muxed_probes() {
        let api = split_api().with_muxed(&[32]);
        let resolution = resolve(&api, MediaType::Video, Some(32)).await.unwrap();

        assert_eq!(api.calls()[0], (32, 16));
        assert_eq!(resolution.candidate.quality, 32);
        assert_eq!(resolution.candidate.height, Some(480));
        assert_eq!(resolution.video_track.unwrap().id, 32);
        assert!(resolution.audio_track.is_none());
    }

    #[tokio::test]
    async fn audio_request_needs_only_audio() {
        let api = FakeApi::new().with_split(vec![], vec![audio_track(30280, 96000)]);
        let resolution = resolve(&api, MediaType::Audio, None).await.unwrap();
        assert!(resolution.video_track.is_none());
        assert_eq!(resolution.audio_track.unwrap().id, 30280);
        assert_eq!(resolution.candidate.width, None);
    }

    #[tokio::test]
    async fn missing_required_track_is_resolution_failure() {
        let api = FakeApi::new().with_split(vec![dash_track(80, 1080)], vec![]);
        let err = resolve(&api, MediaType::Audio, None).await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));

        let api = FakeApi::new().with_split(vec![], vec![audio_track(1, 1)]);
        let err = resolve(&api, MediaType::Merged, None).await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[tokio::test]
    async fn failed_split_degrades_to_legacy_with_inferred_quality() {
        let api = FakeApi::new().with_legacy(
            vec![dash_track(80, 1080), dash_track(64, 720)],
            vec![audio_track(30280, 128000)],
        );
        let resolution = resolve(&api, MediaType::Merged, None).await.unwrap();

        assert!(api.calls().contains(&LEGACY_CALL));
        assert_eq!(resolution.candidate.quality, 80);
        assert!(!resolution.candidate.has_audio);
        assert_eq!(resolution.video_track.unwrap().id, 80);
    }

    #[tokio::test]
    async fn legacy_failure_carries_cause() {
        let api = FakeApi::new();
        match resolve(&api, MediaType::Video, Some(64)).await {
            Err(Error::Resolution { quality, reason, .. }) => {
                assert_eq!(quality, 64);
                assert!(reason.contains("connection reset"));
            }
            other => panic!("expected resolution failure, got {:?}", other),
        }
    }

    #[test]
    fn audio_selection_ignores_input_order() {
        let orders = [
            [64000, 128000, 96000],
            [128000, 96000, 64000],
            [96000, 64000, 128000],
        ];
        for order in orders {
            let tracks: Vec<DashStream> = order.iter().map(|b| audio_track(30200, *b)).collect();
            assert_eq!(select_audio(&tracks).unwrap().bandwidth, 128000);
        }
    }

    #[test]
    fn audio_tie_keeps_first() {
        let tracks = vec![audio_track(1, 128000), audio_track(2, 128000)];
        assert_eq!(select_audio(&tracks).unwrap().id, 1);
        assert!(select_audio(&[]).is_none());
    }

    #[test]
    fn video_selection_prefers_exact_id() {
        let tracks = vec![dash_track(80, 1080), dash_track(64, 720)];
        assert_eq!(select_video(&tracks, 64).unwrap().id, 64);
        assert_eq!(select_video(&tracks, 116).unwrap().id, 80);
    }

    #[tokio::test]
    async fn cancelled_before_first_probe() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let api = split_api().with_muxed(&[64]);
        let result = StreamResolver::new(&api)
            .resolve(&cancel, BV, 1, MediaType::Merged, None)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_probe_stops_the_sequence() {
        let entered = Arc::new(Notify::new());
        let api = split_api().hanging_on((Q_720P, FNVAL_MP4), entered.clone());
        let cancel = CancellationToken::new();

        let resolver = StreamResolver::new(&api);
        let (result, _) = tokio::join!(
            resolver.resolve(&cancel, BV, 1, MediaType::Merged, None),
            async {
                entered.notified().await;
                cancel.cancel();
            }
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(api.calls(), vec![(Q_720P, FNVAL_MP4)]);
    }
}
