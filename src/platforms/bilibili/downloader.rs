use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bilifetch_core::models::media::{DownloadOptions, DownloadResult, MediaType, MergeInstruction};
use bilifetch_core::models::settings::DownloadSettings;

use super::api::PlatformApi;
use super::models::DashStream;
use super::quality::quality_label;
use super::resolver::{guarded, Resolution, StreamResolver};
use crate::core::filename::sanitize_title;
use crate::core::transfer::{TransferEngine, TransferJob, TransferOutcome};
use crate::error::{Error, Result};

/// Artifact names for one video at one quality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    pub audio: PathBuf,
    pub video: PathBuf,
    pub merged: PathBuf,
}

impl ArtifactNames {
    pub fn new(dir: &Path, title: &str, video_id: &str, label: &str) -> Self {
        let stem = format!("{}_{}", title, video_id);
        Self {
            audio: dir.join(format!("{}_audio.m4a", stem)),
            video: dir.join(format!("{}_video_{}.m4v", stem, label)),
            merged: dir.join(format!("{}_{}.mp4", stem, label)),
        }
    }
}

pub struct MediaDownloadService {
    api: Arc<dyn PlatformApi>,
    engine: TransferEngine,
    output_dir: PathBuf,
    audio_timeout: Duration,
    video_timeout: Duration,
}

impl MediaDownloadService {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        engine: TransferEngine,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            engine,
            output_dir: output_dir.into(),
            audio_timeout: Duration::from_secs(10 * 60),
            video_timeout: Duration::from_secs(30 * 60),
        }
    }

    pub fn with_settings(mut self, settings: &DownloadSettings) -> Self {
        self.audio_timeout = Duration::from_secs(settings.audio_timeout_secs);
        self.video_timeout = Duration::from_secs(settings.video_timeout_secs);
        self
    }

    pub async fn download(
        &self,
        cancel: &CancellationToken,
        video_id: &str,
        options: &DownloadOptions,
    ) -> Result<DownloadResult> {
        tracing::info!(
            "[download] {} as {} (quality {:?}, cid {:?})",
            video_id,
            options.media_type,
            options.quality,
            options.cid
        );
        let info = guarded(cancel, self.api.get_video_info(video_id)).await?;
        let cid = options
            .cid
            .filter(|c| *c > 0)
            .or_else(|| info.first_cid())
            .ok_or_else(|| {
                Error::resolution(video_id, options.quality.unwrap_or(0), "video has no cid")
            })?;

        let resolution = StreamResolver::new(self.api.as_ref())
            .resolve(cancel, video_id, cid, options.media_type, options.quality)
            .await?;

        let dir = self.prepare_output_dir().await?;
        let title = sanitize_title(&info.title);
        let names = ArtifactNames::new(&dir, &title, video_id, &resolution.candidate.description);

        let mut result = DownloadResult::new(
            video_id,
            info.title.clone(),
            options.media_type,
            resolution.candidate.clone(),
            resolution.qualities.clone(),
            info.duration,
        );

        match options.media_type {
            MediaType::Audio => self.audio_only(cancel, &resolution, &names, &mut result).await?,
            MediaType::Video => self.video_only(cancel, &resolution, &names, &mut result).await?,
            MediaType::Merged if resolution.candidate.has_audio => {
                self.muxed(cancel, &resolution, &names, &mut result).await?
            }
            MediaType::Merged => {
                self.split_for_merge(cancel, &resolution, &names, &mut result)
                    .await?
            }
        }
        Ok(result)
    }

    async fn prepare_output_dir(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| Error::filesystem(&self.output_dir, e))?;
        std::path::absolute(&self.output_dir).map_err(|e| Error::filesystem(&self.output_dir, e))
    }

    async fn transfer(
        &self,
        cancel: &CancellationToken,
        result: &DownloadResult,
        url: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<TransferOutcome> {
        let job = TransferJob {
            source_url: url.to_string(),
            dest: dest.to_path_buf(),
            video_id: result.video_id.clone(),
            timeout,
        };
        self.engine.run(cancel, &job).await
    }

    async fn audio_only(
        &self,
        cancel: &CancellationToken,
        resolution: &Resolution,
        names: &ArtifactNames,
        result: &mut DownloadResult,
    ) -> Result<()> {
        let track = required(resolution.audio_track.as_ref(), result, "audio")?;
        let outcome = self
            .transfer(cancel, result, &track.base_url, &names.audio, self.audio_timeout)
            .await?;
        result.audio_url = Some(track.base_url.clone());
        result.audio_path = Some(names.audio.clone());
        result.audio_size = Some(outcome.bytes);
        result.notes.push(format!("audio {}", outcome.note()));
        Ok(())
    }

    async fn video_only(
        &self,
        cancel: &CancellationToken,
        resolution: &Resolution,
        names: &ArtifactNames,
        result: &mut DownloadResult,
    ) -> Result<()> {
        let track = required(resolution.video_track.as_ref(), result, "video")?;
        let outcome = self
            .transfer(cancel, result, &track.base_url, &names.video, self.video_timeout)
            .await?;
        result.video_url = Some(track.base_url.clone());
        result.video_path = Some(names.video.clone());
        result.video_size = Some(outcome.bytes);
        result.notes.push(format!("video {} (no audio track)", outcome.note()));
        note_substitute_track(track, result);
        Ok(())
    }

    async fn muxed(
        &self,
        cancel: &CancellationToken,
        resolution: &Resolution,
        names: &ArtifactNames,
        result: &mut DownloadResult,
    ) -> Result<()> {
        let url = resolution.muxed_url().ok_or_else(|| {
            Error::resolution(&result.video_id, result.quality, "muxed manifest has no segments")
        })?;
        let outcome = self
            .transfer(cancel, result, url, &names.merged, self.video_timeout)
            .await?;
        result.video_url = Some(url.to_string());
        result.merged_path = Some(names.merged.clone());
        result.merged_size = Some(outcome.bytes);
        result
            .notes
            .push(format!("mp4 with audio and video {}", outcome.note()));
        Ok(())
    }

    async fn split_for_merge(
        &self,
        cancel: &CancellationToken,
        resolution: &Resolution,
        names: &ArtifactNames,
        result: &mut DownloadResult,
    ) -> Result<()> {
        if let Ok(meta) = tokio::fs::metadata(&names.merged).await {
            if meta.is_file() {
                tracing::info!("[download] {} already merged, skipping", names.merged.display());
                result.merged_path = Some(names.merged.clone());
                result.merged_size = Some(meta.len());
                result.notes.push("merged file already exists, skipped".into());
                return Ok(());
            }
        }

        let audio = required(resolution.audio_track.as_ref(), result, "audio")?;
        let video = required(resolution.video_track.as_ref(), result, "video")?;

        let audio_outcome = self
            .transfer(cancel, result, &audio.base_url, &names.audio, self.audio_timeout)
            .await?;
        let video_outcome = self
            .transfer(cancel, result, &video.base_url, &names.video, self.video_timeout)
            .await?;

        result.audio_url = Some(audio.base_url.clone());
        result.video_url = Some(video.base_url.clone());
        result.audio_path = Some(names.audio.clone());
        result.video_path = Some(names.video.clone());
        result.audio_size = Some(audio_outcome.bytes);
        result.video_size = Some(video_outcome.bytes);
        result.merge = Some(MergeInstruction::ffmpeg(
            names.audio.clone(),
            names.video.clone(),
            names.merged.clone(),
        ));

        let note = match (audio_outcome.already_existed, video_outcome.already_existed) {
            (true, true) => "audio and video already exist, merge with ffmpeg",
            (true, false) => "audio already exists, video downloaded, merge with ffmpeg",
            (false, true) => "video already exists, audio downloaded, merge with ffmpeg",
            (false, false) => "audio and video downloaded, merge with ffmpeg",
        };
        result.notes.push(note.into());
        note_substitute_track(video, result);
        Ok(())
    }
}

/// File names carry the candidate's label. When the manifest lacked that id the
/// first listed track was taken instead, and the note says which one.
fn note_substitute_track(track: &DashStream, result: &mut DownloadResult) {
    if track.id == result.quality {
        return;
    }
    result.notes.push(format!(
        "{} not offered, video track {} ({}) was downloaded",
        result.quality_label,
        track.id,
        quality_label(track.id)
    ));
}


fn required<'r, T>(track: Option<&'r T>, result: &DownloadResult, kind: &str) -> Result<&'r T> {
    track.ok_or_else(|| {
        Error::resolution(
            &result.video_id,
            result.quality,
            format!("no {} track selected", kind),
        )
    })
}
