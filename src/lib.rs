use std::sync::Arc;
use std::time::Duration;

use bilifetch_core::core::events::ProgressReporter;
use bilifetch_core::models::settings::AppSettings;

use crate::core::browser::ChromiumLauncher;
use crate::core::http_client;
use crate::core::rate_limiter::OperationRateLimiter;
use crate::core::session_pool::{PoolOptions, SessionPool};
use crate::core::transfer::TransferEngine;
use crate::storage::credentials::FileCredentialStore;

pub mod commands;
pub mod core;
pub mod error;
pub mod platforms;
pub mod storage;

pub use error::{Error, Result};

/// Everything an operation needs, built once per process.
pub struct AppState {
    pub settings: AppSettings,
    pub pool: Arc<SessionPool>,
    pub rate_limiter: OperationRateLimiter,
    /// Client for CDN byte transfers.
    pub http: reqwest::Client,
    pub reporter: Option<Arc<dyn ProgressReporter>>,
}

impl AppState {
    pub fn new(settings: AppSettings, pool: Arc<SessionPool>) -> Result<Self> {
        let http = http_client::transfer_client(&settings)?;
        Ok(Self {
            settings,
            pool,
            rate_limiter: OperationRateLimiter::new(),
            http,
            reporter: None,
        })
    }

    /// Launches the browser pool and wires the file credential store.
    pub async fn bootstrap(settings: AppSettings) -> Result<Self> {
        let launcher = ChromiumLauncher::new(settings.browser.clone());
        let store = Arc::new(FileCredentialStore::new(settings.accounts.cookie_dir.clone()));
        let options = PoolOptions::from_settings(
            &settings.browser,
            settings.accounts.default_account.clone(),
        );
        let pool = SessionPool::start(&launcher, settings.browser.pool_size, store, options).await?;
        Self::new(settings, Arc::new(pool))
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn transfer_engine(&self) -> TransferEngine {
        let engine = TransferEngine::new(
            self.http.clone(),
            self.settings.download.user_agent.clone(),
            self.settings.api.site_url.clone(),
        )
        .with_stall_timeout(Duration::from_secs(self.settings.download.stall_timeout_secs));
        match &self.reporter {
            Some(reporter) => engine.with_reporter(reporter.clone()),
            None => engine,
        }
    }

    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}
