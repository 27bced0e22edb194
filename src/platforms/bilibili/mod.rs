pub mod api;
pub mod catalog;
pub mod downloader;
pub mod models;
pub mod quality;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{extract_video_id, BilibiliClient, PlatformApi, VideoId};
pub use downloader::MediaDownloadService;
pub use resolver::{Resolution, StreamResolver};
