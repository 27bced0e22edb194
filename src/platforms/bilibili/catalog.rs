use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use bilifetch_core::models::media::QualityInfo;

use super::api::PlatformApi;
use super::quality::{
    preference_rank, quality_label, DEFAULT_SPLIT_QUALITY, FNVAL_DASH, FNVAL_MP4,
    MUXED_CANDIDATES, PLATFORM_HTML5, Q_1080P, Q_360P, Q_480P, Q_720P,
};
use super::resolver::guarded;
use crate::error::{Error, Result};

const FALLBACK_QUALITIES: [u32; 4] = [Q_1080P, Q_720P, Q_480P, Q_360P];

/// Lists what a video page is available in. Probe failures degrade to a fixed
/// list; only cancellation is returned as an error.
pub async fn enumerate(
    cancel: &CancellationToken,
    api: &dyn PlatformApi,
    video_id: &str,
    cid: i64,
) -> Result<Vec<QualityInfo>> {
    let split = guarded(
        cancel,
        api.get_video_stream(
            video_id,
            cid,
            Some(DEFAULT_SPLIT_QUALITY),
            FNVAL_DASH,
            Some(PLATFORM_HTML5),
        ),
    )
    .await;

    let dash = match split {
        Ok(data) => match data.dash {
            Some(dash) => dash,
            None => {
                tracing::warn!(
                    "[catalog] {} returned no split manifest, using fallback list",
                    video_id
                );
                return Ok(fallback_list());
            }
        },
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            tracing::warn!(
                "[catalog] split probe for {} failed, using fallback list: {}",
                video_id,
                e
            );
            return Ok(fallback_list());
        }
    };

    let mut found: BTreeMap<u32, QualityInfo> = BTreeMap::new();
    for track in &dash.video {
        found.entry(track.id).or_insert_with(|| QualityInfo {
            quality: track.id,
            description: quality_label(track.id),
            width: track.width,
            height: track.height,
            has_audio: false,
            available: true,
        });
    }

    for q in MUXED_CANDIDATES {
        let probe = guarded(
            cancel,
            api.get_video_stream(video_id, cid, Some(q), FNVAL_MP4, Some(PLATFORM_HTML5)),
        )
        .await;
        match probe {
            Ok(data) if !data.durl.is_empty() => {
                found
                    .entry(q)
                    .and_modify(|info| info.has_audio = true)
                    .or_insert_with(|| QualityInfo {
                        quality: q,
                        description: quality_label(q),
                        width: 0,
                        height: 0,
                        has_audio: true,
                        available: true,
                    });
            }
            Ok(_) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => tracing::debug!("[catalog] muxed probe {} for {}: {}", q, video_id, e),
        }
    }

    let mut qualities: Vec<QualityInfo> = found.into_values().collect();
    qualities.sort_by_key(|info| preference_rank(info.quality));
    tracing::debug!("[catalog] {} offers {} qualities", video_id, qualities.len());
    Ok(qualities)
}

pub fn fallback_list() -> Vec<QualityInfo> {
    FALLBACK_QUALITIES
        .iter()
        .map(|&q| QualityInfo {
            quality: q,
            description: quality_label(q),
            width: 0,
            height: 0,
            has_audio: q <= Q_720P,
            available: true,
        })
        .collect()
}
