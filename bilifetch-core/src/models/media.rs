use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    /// Audio and video in one playable file, either muxed upstream or merged locally.
    #[default]
    Merged,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Merged => "merged",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            "merged" | "combined" => Ok(MediaType::Merged),
            other => Err(format!(
                "unsupported media type '{}', expected audio, video or merged",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityInfo {
    pub quality: u32,
    pub description: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub has_audio: bool,
    pub available: bool,
}

/// The representation a download will use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCandidate {
    pub quality: u32,
    pub description: String,
    /// True when the stream is muxed and needs no merge step.
    pub has_audio: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeInstruction {
    pub audio_path: PathBuf,
    pub video_path: PathBuf,
    pub merged_path: PathBuf,
    pub command: String,
}

impl MergeInstruction {
    pub fn ffmpeg(audio_path: PathBuf, video_path: PathBuf, merged_path: PathBuf) -> Self {
        let command = format!(
            "ffmpeg -i \"{}\" -i \"{}\" -c copy \"{}\"",
            video_path.display(),
            audio_path.display(),
            merged_path.display()
        );
        Self {
            audio_path,
            video_path,
            merged_path,
            command,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub media_type: MediaType,
    /// `None` lets the resolver pick.
    pub quality: Option<u32>,
    /// `None` uses the first page.
    pub cid: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub video_id: String,
    pub title: String,
    pub media_type: MediaType,
    pub quality: u32,
    pub quality_label: String,
    pub duration_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,

    pub current_quality: StreamCandidate,
    pub available_qualities: Vec<QualityInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeInstruction>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl DownloadResult {
    pub fn new(
        video_id: impl Into<String>,
        title: impl Into<String>,
        media_type: MediaType,
        candidate: StreamCandidate,
        available_qualities: Vec<QualityInfo>,
        duration_secs: u64,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            title: title.into(),
            media_type,
            quality: candidate.quality,
            quality_label: candidate.description.clone(),
            duration_secs,
            audio_path: None,
            video_path: None,
            merged_path: None,
            audio_size: None,
            video_size: None,
            merged_size: None,
            audio_url: None,
            video_url: None,
            current_quality: candidate,
            available_qualities,
            merge: None,
            notes: Vec::new(),
        }
    }

    pub fn merge_required(&self) -> bool {
        self.merge.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_parses_aliases() {
        assert_eq!("Audio".parse::<MediaType>().unwrap(), MediaType::Audio);
        assert_eq!("combined".parse::<MediaType>().unwrap(), MediaType::Merged);
        assert!("subtitle".parse::<MediaType>().is_err());
    }

    #[test]
    fn media_type_serializes_lowercase() {
        let json = serde_json::to_string(&MediaType::Video).unwrap();
        assert_eq!(json, "\"video\"");
    }

    #[test]
    fn merge_command_puts_video_first() {
        let m = MergeInstruction::ffmpeg(
            PathBuf::from("/out/a.m4a"),
            PathBuf::from("/out/v.m4v"),
            PathBuf::from("/out/m.mp4"),
        );
        assert_eq!(
            m.command,
            "ffmpeg -i \"/out/v.m4v\" -i \"/out/a.m4a\" -c copy \"/out/m.mp4\""
        );
    }

    #[test]
    fn result_omits_absent_paths() {
        let candidate = StreamCandidate {
            quality: 64,
            description: "720p".into(),
            has_audio: true,
            width: None,
            height: None,
        };
        let result = DownloadResult::new("BV1", "t", MediaType::Merged, candidate, vec![], 10);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("audio_path").is_none());
        assert!(json.get("merge").is_none());
        assert_eq!(json["quality_label"], "720p");
        assert!(!result.merge_required());
    }
}
