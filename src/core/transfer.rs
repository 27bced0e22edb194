use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, REFERER, USER_AGENT,
};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bilifetch_core::core::events::{ProgressReporter, TransferProgress, TransferStatus};

use crate::error::{Error, Result};

pub const STALL_TIMEOUT: Duration = Duration::from_secs(45);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);
const PROGRESS_STEP_PERCENT: f64 = 5.0;
const PART_SUFFIX: &str = ".downloading";

pub fn part_path_for(output: &Path) -> PathBuf {
    let mut part = output.as_os_str().to_owned();
    part.push(PART_SUFFIX);
    PathBuf::from(part)
}

/// Headers the CDN expects before it hands out media bytes.
pub fn identity_headers(user_agent: &str, site_url: &str, video_id: &str) -> Result<HeaderMap> {
    let referer = format!("{}/video/{}", site_url.trim_end_matches('/'), video_id);
    let mut headers = HeaderMap::new();
    let value = |v: &str| {
        HeaderValue::from_str(v).map_err(|e| Error::transport("request headers", e))
    };
    headers.insert(USER_AGENT, value(user_agent)?);
    headers.insert(REFERER, value(&referer)?);
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
    );
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
    Ok(headers)
}

#[derive(Debug, Clone)]
pub struct TransferJob {
    pub source_url: String,
    pub dest: PathBuf,
    /// Video the artifact belongs to, used for the referer.
    pub video_id: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes: u64,
    pub already_existed: bool,
}

impl TransferOutcome {
    pub fn note(&self) -> &'static str {
        if self.already_existed {
            "already exists, skipped"
        } else {
            "downloaded"
        }
    }
}

/// Decides when a progress update is due and computes its figures.
pub struct ProgressTracker {
    file_name: String,
    total: Option<u64>,
    started: Instant,
    last_emit: Instant,
    last_percent: f64,
}

impl ProgressTracker {
    pub fn new(file_name: impl Into<String>, total: Option<u64>, now: Instant) -> Self {
        Self {
            file_name: file_name.into(),
            total: total.filter(|t| *t > 0),
            started: now,
            last_emit: now,
            last_percent: 0.0,
        }
    }

    pub fn update(&mut self, downloaded: u64, now: Instant) -> Option<TransferProgress> {
        let percent = self
            .total
            .map(|t| (downloaded as f64 * 100.0 / t as f64).min(100.0));

        let interval_due = now.saturating_duration_since(self.last_emit) >= PROGRESS_INTERVAL;
        let step_due = percent.is_some_and(|p| p - self.last_percent >= PROGRESS_STEP_PERCENT);
        if !interval_due && !step_due {
            return None;
        }

        self.last_emit = now;
        if let Some(p) = percent {
            self.last_percent = p;
        }
        Some(self.snapshot(downloaded, percent, now))
    }

    fn snapshot(&self, downloaded: u64, percent: Option<f64>, now: Instant) -> TransferProgress {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let speed = if elapsed > 0.0 {
            downloaded as f64 / elapsed
        } else {
            0.0
        };
        let eta_seconds = match (self.total, speed > 0.0) {
            (Some(total), true) => Some(total.saturating_sub(downloaded) as f64 / speed),
            _ => None,
        };
        TransferProgress {
            file_name: self.file_name.clone(),
            downloaded_bytes: downloaded,
            total_bytes: self.total,
            percent,
            speed_bytes_per_sec: speed,
            eta_seconds,
            elapsed_secs: elapsed,
        }
    }
}

#[derive(Clone)]
pub struct TransferEngine {
    client: reqwest::Client,
    user_agent: String,
    site_url: String,
    stall_timeout: Duration,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl TransferEngine {
    pub fn new(
        client: reqwest::Client,
        user_agent: impl Into<String>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            site_url: site_url.into(),
            stall_timeout: STALL_TIMEOUT,
            reporter: None,
        }
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Streams `job.source_url` into `job.dest`. An existing destination is
    /// returned as-is without touching the network. Bytes land in a
    /// `.downloading` sibling that is renamed into place only on success and
    /// removed on every failure.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        job: &TransferJob,
    ) -> Result<TransferOutcome> {
        if let Some(existing) = existing_size(&job.dest).await? {
            return Ok(self.skipped(&job.dest, existing));
        }

        let part = part_path_for(&job.dest);
        let name = file_label(&job.dest);
        self.report_status(&name, &TransferStatus::Pending);
        let work = async {
            let response = self.request(job).await?;
            let total = response.content_length();
            self.write_body(response.bytes_stream(), &part, total, &name).await
        };
        let result = self.bounded(cancel, job.timeout, work).await;
        self.finish(result, &part, &job.dest).await
    }

    /// Same contract as [`run`](Self::run) for a body that is already open.
    pub async fn run_stream<S, B, E>(
        &self,
        cancel: &CancellationToken,
        body: S,
        total: Option<u64>,
        dest: &Path,
        timeout: Duration,
    ) -> Result<TransferOutcome>
    where
        S: Stream<Item = std::result::Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        if let Some(existing) = existing_size(dest).await? {
            return Ok(self.skipped(dest, existing));
        }

        let part = part_path_for(dest);
        let name = file_label(dest);
        self.report_status(&name, &TransferStatus::Pending);
        let work = self.write_body(body, &part, total, &name);
        let result = self.bounded(cancel, timeout, work).await;
        self.finish(result, &part, dest).await
    }

    fn skipped(&self, dest: &Path, size: u64) -> TransferOutcome {
        tracing::info!("[transfer] {} already exists ({} bytes), skipping", dest.display(), size);
        self.report_status(&file_label(dest), &TransferStatus::Complete { bytes: size });
        TransferOutcome {
            bytes: size,
            already_existed: true,
        }
    }

    async fn request(&self, job: &TransferJob) -> Result<reqwest::Response> {
        let headers = identity_headers(&self.user_agent, &self.site_url, &job.video_id)?;
        let response = self
            .client
            .get(&job.source_url)
            .headers(headers)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::transport(
                "transfer",
                format!("HTTP {} from {}", response.status(), redact(&job.source_url)),
            ));
        }

        if let Some(ct) = response.headers().get("content-type") {
            if let Ok(ct_str) = ct.to_str() {
                if ct_str.contains("text/html") {
                    return Err(Error::transport(
                        "transfer",
                        "origin returned HTML instead of media, the URL may have expired",
                    ));
                }
            }
        }
        Ok(response)
    }

    async fn write_body<S, B, E>(
        &self,
        mut body: S,
        part_path: &Path,
        total: Option<u64>,
        name: &str,
    ) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        if let Some(parent) = part_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::filesystem(parent, e))?;
        }
        let file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| Error::filesystem(part_path, e))?;
        let mut file = tokio::io::BufWriter::with_capacity(256 * 1024, file);

        self.report_status(name, &TransferStatus::Running);
        let mut tracker = ProgressTracker::new(name, total, Instant::now());
        let mut downloaded = 0u64;

        loop {
            match tokio::time::timeout(self.stall_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => {
                    let chunk = chunk.as_ref();
                    file.write_all(chunk)
                        .await
                        .map_err(|e| Error::filesystem(part_path, e))?;
                    downloaded += chunk.len() as u64;
                    if let Some(progress) = tracker.update(downloaded, Instant::now()) {
                        self.emit(&progress);
                    }
                }
                Ok(Some(Err(e))) => {
                    return Err(Error::transport("transfer body", e));
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(Error::transport(
                        "transfer body",
                        format!("no data received for {} seconds", self.stall_timeout.as_secs()),
                    ));
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| Error::filesystem(part_path, e))?;

        if let Some(expected) = total {
            if expected > 0 && downloaded != expected {
                return Err(Error::transport(
                    "transfer body",
                    format!(
                        "incomplete body: expected {} bytes, received {}",
                        expected, downloaded
                    ),
                ));
            }
        }
        Ok(downloaded)
    }

    async fn bounded<F>(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        work: F,
    ) -> Result<u64>
    where
        F: Future<Output = Result<u64>>,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = tokio::time::timeout(timeout, work) => match r {
                Ok(inner) => inner,
                Err(_) => Err(Error::transport(
                    "transfer",
                    format!("timed out after {} seconds", timeout.as_secs()),
                )),
            },
        }
    }

    async fn finish(
        &self,
        result: Result<u64>,
        part: &Path,
        dest: &Path,
    ) -> Result<TransferOutcome> {
        let name = file_label(dest);
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_part(part).await;
                tracing::warn!("[transfer] {} failed: {}", name, e);
                self.report_failed(&name, &e);
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(part, dest).await {
            remove_part(part).await;
            let e = Error::filesystem(dest, e);
            self.report_failed(&name, &e);
            return Err(e);
        }

        tracing::info!(
            "[transfer] {} complete ({:.2} MB)",
            dest.display(),
            bytes as f64 / (1024.0 * 1024.0)
        );
        self.report_status(&name, &TransferStatus::Complete { bytes });
        Ok(TransferOutcome {
            bytes,
            already_existed: false,
        })
    }

    fn emit(&self, progress: &TransferProgress) {
        match (progress.percent, progress.eta_seconds) {
            (Some(percent), eta) => tracing::info!(
                "[transfer] {} {:.1}% ({:.2}/{:.2} MB) {:.2} MB/s eta {:.0}s",
                progress.file_name,
                percent,
                progress.downloaded_bytes as f64 / (1024.0 * 1024.0),
                progress.total_bytes.unwrap_or(0) as f64 / (1024.0 * 1024.0),
                progress.speed_bytes_per_sec / (1024.0 * 1024.0),
                eta.unwrap_or(0.0)
            ),
            (None, _) => tracing::info!(
                "[transfer] {} {:.2} MB {:.2} MB/s",
                progress.file_name,
                progress.downloaded_bytes as f64 / (1024.0 * 1024.0),
                progress.speed_bytes_per_sec / (1024.0 * 1024.0)
            ),
        }
        if let Some(reporter) = &self.reporter {
            reporter.report_progress(progress);
        }
    }

    fn report_status(&self, name: &str, status: &TransferStatus) {
        if let Some(reporter) = &self.reporter {
            reporter.report_status(name, status);
        }
    }

    fn report_failed(&self, name: &str, e: &Error) {
        self.report_status(
            name,
            &TransferStatus::Failed {
                message: e.to_string(),
            },
        );
    }
}

async fn existing_size(dest: &Path) -> Result<Option<u64>> {
    match tokio::fs::metadata(dest).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::filesystem(dest, e)),
    }
}

async fn remove_part(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("[transfer] could not remove {}: {}", part.display(), e);
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Signed CDN URLs carry their token in the query string.
fn redact(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.query().is_some() => {
            parsed.set_query(None);
            format!("{}?…", parsed)
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => raw.split('?').next().unwrap_or(raw).to_string(),
    }
}
