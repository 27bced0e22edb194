use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fs_paths::{AppPaths, DesktopPaths};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub schema_version: u32,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub accounts: AccountSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Upper bound for an audio-only transfer.
    #[serde(default = "default_audio_timeout_secs")]
    pub audio_timeout_secs: u64,
    /// Upper bound for video-only and combined transfers.
    #[serde(default = "default_video_timeout_secs")]
    pub video_timeout_secs: u64,
    /// Abort when no body bytes arrive for this long.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_checkout_timeout_secs")]
    pub checkout_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub viewport: ViewportSettings,
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewportSettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    #[serde(default = "default_cookie_dir")]
    pub cookie_dir: PathBuf,
    /// Overrides the store's own default-account flag when set.
    #[serde(default)]
    pub default_account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_download_interval_secs")]
    pub download_interval_secs: u64,
    #[serde(default = "default_stream_interval_secs")]
    pub stream_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    DesktopPaths.downloads_dir()
}

fn default_audio_timeout_secs() -> u64 {
    10 * 60
}

fn default_video_timeout_secs() -> u64 {
    30 * 60
}

fn default_stall_timeout_secs() -> u64 {
    45
}

pub fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

fn default_pool_size() -> usize {
    2
}

fn default_checkout_timeout_secs() -> u64 {
    30
}

fn default_cookie_dir() -> PathBuf {
    DesktopPaths.cookie_dir()
}

fn default_api_base_url() -> String {
    "https://api.bilibili.com".into()
}

fn default_site_url() -> String {
    "https://www.bilibili.com".into()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_download_interval_secs() -> u64 {
    5
}

fn default_stream_interval_secs() -> u64 {
    2
}

fn default_proxy_type() -> String {
    "http".into()
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            audio_timeout_secs: default_audio_timeout_secs(),
            video_timeout_secs: default_video_timeout_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            pool_size: default_pool_size(),
            checkout_timeout_secs: default_checkout_timeout_secs(),
            user_agent: default_user_agent(),
            viewport: ViewportSettings::default(),
            executable: None,
            extra_args: Vec::new(),
        }
    }
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            cookie_dir: default_cookie_dir(),
            default_account: None,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            site_url: default_site_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            download_interval_secs: default_download_interval_secs(),
            stream_interval_secs: default_stream_interval_secs(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            download: DownloadSettings::default(),
            browser: BrowserSettings::default(),
            accounts: AccountSettings::default(),
            api: ApiSettings::default(),
            rate_limit: RateLimitSettings::default(),
            proxy: ProxySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
