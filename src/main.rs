use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bilifetch::commands::media::{self, DownloadRequest, QualitiesRequest, StreamRequest};
use bilifetch::storage::config;
use bilifetch::AppState;
use bilifetch_core::fs_paths::{AppPaths, DesktopPaths};
use bilifetch_core::models::media::MediaType;
use bilifetch_core::models::settings::LoggingSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file, defaults to the per-user config location
    #[arg(long, global = true, env = "BILIFETCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download audio, video or a playable file for one video
    Download {
        /// Video id (BV…/av…) or URL
        video: String,
        #[arg(long, default_value = "merged")]
        media_type: MediaType,
        #[arg(long)]
        quality: Option<u32>,
        #[arg(long)]
        cid: Option<i64>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List the qualities a video is offered in
    Qualities {
        video: String,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        cid: Option<i64>,
    },
    /// Print playback URLs without downloading
    Stream {
        video: String,
        #[arg(long)]
        quality: Option<u32>,
        #[arg(long)]
        fnval: Option<u32>,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        cid: Option<i64>,
    },
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", logging.level)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode result")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(|| DesktopPaths.config_file());
    let settings = config::load_settings(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;
    init_tracing(&settings.logging);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let state = AppState::bootstrap(settings)
        .await
        .context("Failed to start the browser pool")?;

    let outcome = run(&state, &cancel, cli.command).await;
    state.shutdown().await;
    outcome
}

async fn run(state: &AppState, cancel: &CancellationToken, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Download {
            video,
            media_type,
            quality,
            cid,
            account,
            output,
        } => {
            let request = DownloadRequest {
                video,
                account,
                media_type,
                quality,
                cid,
                output_dir: output,
            };
            let result = media::download_media(state, cancel, request)
                .await
                .context("Download failed")?;
            print_json(&result)
        }
        Command::Qualities { video, account, cid } => {
            let request = QualitiesRequest { video, account, cid };
            let qualities = media::list_qualities(state, cancel, request)
                .await
                .context("Failed to list qualities")?;
            print_json(&qualities)
        }
        Command::Stream {
            video,
            quality,
            fnval,
            platform,
            account,
            cid,
        } => {
            let request = StreamRequest {
                video,
                account,
                cid,
                quality,
                fnval,
                platform,
            };
            let info = media::get_video_stream(state, cancel, request)
                .await
                .context("Failed to fetch stream URLs")?;
            print_json(&info)
        }
    }
}
