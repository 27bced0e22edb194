use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Bilibili sends `null` where an empty list is meant.
fn null_as_default<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn into_data(self) -> Result<T> {
        if self.code != 0 {
            return Err(Error::Api {
                code: self.code,
                message: self.message,
            });
        }
        self.data
            .ok_or_else(|| Error::Decode("response has code 0 but no data".into()))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Owner {
    #[serde(default)]
    pub mid: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoPage {
    pub cid: i64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub part: String,
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoInfo {
    pub aid: i64,
    #[serde(default)]
    pub bvid: String,
    pub title: String,
    #[serde(default)]
    pub desc: String,
    /// Seconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub cid: i64,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pages: Vec<VideoPage>,
}

impl VideoInfo {
    pub fn first_cid(&self) -> Option<i64> {
        self.pages
            .first()
            .map(|p| p.cid)
            .or(Some(self.cid))
            .filter(|cid| *cid > 0)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashStream {
    pub id: u32,
    #[serde(rename = "baseUrl", alias = "base_url")]
    pub base_url: String,
    #[serde(
        rename = "backupUrl",
        alias = "backup_url",
        default,
        deserialize_with = "null_as_default"
    )]
    pub backup_url: Vec<String>,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(rename = "mimeType", alias = "mime_type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub codecs: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(rename = "frameRate", alias = "frame_rate", default)]
    pub frame_rate: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DashInfo {
    #[serde(default)]
    pub duration: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub video: Vec<DashStream>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub audio: Vec<DashStream>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoSegment {
    #[serde(default)]
    pub order: u32,
    /// Milliseconds.
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub size: u64,
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub backup_url: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupportFormat {
    pub quality: u32,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub new_description: String,
}

/// Payload of `/x/player/wbi/playurl`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VideoStreamData {
    #[serde(default)]
    pub quality: u32,
    #[serde(default)]
    pub format: String,
    /// Milliseconds.
    #[serde(default)]
    pub timelength: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub accept_quality: Vec<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub accept_description: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub durl: Vec<VideoSegment>,
    #[serde(default)]
    pub dash: Option<DashInfo>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub support_formats: Vec<SupportFormat>,
}

/// Payload of the legacy `/x/player/playurl` endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlayUrlData {
    #[serde(default)]
    pub dash: DashInfo,
}

/// What the platform returned for a probe, reduced to the two shapes it comes in.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StreamManifest {
    /// Independent audio and video tracks that need a local merge.
    Split {
        video: Vec<DashStream>,
        audio: Vec<DashStream>,
    },
    /// One container holding both audio and video.
    Muxed { segments: Vec<VideoSegment> },
}

impl StreamManifest {
    pub fn is_muxed(&self) -> bool {
        matches!(self, StreamManifest::Muxed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_code_is_api_error() {
        let resp: ApiResponse<VideoInfo> =
            serde_json::from_str(r#"{"code":-404,"message":"啥都木有","data":null}"#).unwrap();
        match resp.into_data() {
            Err(Error::Api { code, message }) => {
                assert_eq!(code, -404);
                assert_eq!(message, "啥都木有");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn zero_code_without_data_is_decode_error() {
        let resp: ApiResponse<VideoInfo> =
            serde_json::from_str(r#"{"code":0,"message":"0"}"#).unwrap();
        assert!(matches!(resp.into_data(), Err(Error::Decode(_))));
    }

    #[test]
    fn dash_tolerates_null_audio() {
        let json = r#"{"quality":80,"timelength":1000,"dash":{"duration":1,
            "video":[{"id":80,"baseUrl":"https://cdn/v.m4s","bandwidth":1,"mimeType":"video/mp4",
            "codecs":"avc1","width":1920,"height":1080,"backupUrl":null}],"audio":null}}"#;
        let data: VideoStreamData = serde_json::from_str(json).unwrap();
        let dash = data.dash.unwrap();
        assert_eq!(dash.video.len(), 1);
        assert!(dash.audio.is_empty());
        assert!(dash.video[0].backup_url.is_empty());
    }

    #[test]
    fn first_cid_prefers_pages() {
        let info: VideoInfo = serde_json::from_str(
            r#"{"aid":1,"title":"t","cid":5,"pages":[{"cid":7,"page":1}]}"#,
        )
        .unwrap();
        assert_eq!(info.first_cid(), Some(7));

        let info: VideoInfo =
            serde_json::from_str(r#"{"aid":1,"title":"t","pages":null}"#).unwrap();
        assert_eq!(info.first_cid(), None);
    }
}
