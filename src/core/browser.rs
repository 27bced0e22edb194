use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, GetCookiesParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use bilifetch_core::models::settings::BrowserSettings;

use crate::error::{Error, Result};
use crate::storage::credentials::StoredCookie;

const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--no-first-run",
    "--no-zygote",
    "--disable-gpu",
];

/// Origins whose cookies are read back out of a context.
const COOKIE_URLS: &[&str] = &[
    "https://www.bilibili.com",
    "https://api.bilibili.com",
    "https://passport.bilibili.com",
];

#[derive(Debug, Clone)]
pub struct ContextProfile {
    pub user_agent: String,
    pub viewport: (u32, u32),
}

impl From<&BrowserSettings> for ContextProfile {
    fn from(settings: &BrowserSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            viewport: (settings.viewport.width, settings.viewport.height),
        }
    }
}

#[async_trait]
pub trait BackendLauncher: Send + Sync {
    async fn launch(&self, index: usize) -> Result<Box<dyn ExecutionBackend>>;
}

/// One heavyweight automation resource owned by the session pool.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn open_isolated(&self, profile: &ContextProfile) -> Result<Box<dyn IsolatedContext>>;
    async fn shutdown(&self) -> Result<()>;
}

/// A throwaway cookie jar inside a backend.
#[async_trait]
pub trait IsolatedContext: Send {
    async fn install_cookies(&mut self, cookies: &[StoredCookie]) -> Result<()>;
    async fn read_cookies(&mut self) -> Result<Vec<StoredCookie>>;
    async fn close(self: Box<Self>) -> Result<()>;
}

fn browser_err(stage: &str, e: impl std::fmt::Display) -> Error {
    Error::Browser(format!("{}: {}", stage, e))
}

pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn profile_dir(index: usize) -> PathBuf {
        std::env::temp_dir().join(format!(
            "bilifetch-browser-{}-{}",
            std::process::id(),
            index
        ))
    }
}

#[async_trait]
impl BackendLauncher for ChromiumLauncher {
    async fn launch(&self, index: usize) -> Result<Box<dyn ExecutionBackend>> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(Self::profile_dir(index))
            .window_size(self.settings.viewport.width, self.settings.viewport.height)
            .args(
                LAUNCH_ARGS
                    .iter()
                    .map(|a| a.to_string())
                    .chain(self.settings.extra_args.iter().cloned()),
            );
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &self.settings.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder
            .build()
            .map_err(|e| browser_err("configure", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| browser_err("launch", e))?;
        let handler_task = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });
        tracing::info!("[pool] browser {} launched", index);

        Ok(Box::new(ChromiumBackend {
            browser: Arc::new(Mutex::new(browser)),
            handler_task,
        }))
    }
}

pub struct ChromiumBackend {
    browser: Arc<Mutex<Browser>>,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl ExecutionBackend for ChromiumBackend {
    async fn open_isolated(&self, profile: &ContextProfile) -> Result<Box<dyn IsolatedContext>> {
        let mut browser = self.browser.lock().await;
        let context_id = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| browser_err("create context", e))?;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .width(profile.viewport.0 as i64)
            .height(profile.viewport.1 as i64)
            .build()
            .map_err(|e| browser_err("create target", e))?;
        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.dispose_browser_context(context_id).await;
                return Err(browser_err("new page", e));
            }
        };
        drop(browser);

        if let Err(e) = page.set_user_agent(profile.user_agent.as_str()).await {
            tracing::warn!("[session] failed to set user agent: {}", e);
        }

        Ok(Box::new(ChromiumContext {
            browser: self.browser.clone(),
            context_id: Some(context_id),
            page: Some(page),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.map(|_| ());
        let _ = browser.wait().await;
        self.handler_task.abort();
        closed.map_err(|e| browser_err("close", e))
    }
}

/// Both options are taken by `close`. Anything still set at drop time is
/// disposed on a spawned task.
struct ChromiumContext {
    browser: Arc<Mutex<Browser>>,
    context_id: Option<BrowserContextId>,
    page: Option<Page>,
}

impl ChromiumContext {
    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| Error::Browser("context already closed".into()))
    }
}

async fn dispose(
    browser: Arc<Mutex<Browser>>,
    context_id: BrowserContextId,
    page: Option<Page>,
) -> Result<()> {
    if let Some(page) = page {
        if let Err(e) = page.close().await {
            tracing::debug!("[session] page close failed: {}", e);
        }
    }
    let browser = browser.lock().await;
    browser
        .dispose_browser_context(context_id)
        .await
        .map_err(|e| browser_err("dispose context", e))
}

impl Drop for ChromiumContext {
    fn drop(&mut self) {
        let Some(context_id) = self.context_id.take() else {
            return;
        };
        let page = self.page.take();
        let browser = self.browser.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = dispose(browser, context_id, page).await {
                    tracing::debug!("[session] dispose on drop failed: {}", e);
                }
            });
        }
    }
}

fn to_cookie_param(cookie: &StoredCookie) -> Result<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only);
    if !cookie.domain.is_empty() {
        builder = builder.domain(cookie.domain.clone());
    }
    if cookie.expires > 0.0 {
        builder = builder.expires(TimeSinceEpoch::new(cookie.expires));
    }
    if let Some(same_site) = cookie.same_site.as_deref().and_then(parse_same_site) {
        builder = builder.same_site(same_site);
    }
    builder
        .build()
        .map_err(|e| browser_err("cookie param", e))
}

fn parse_same_site(value: &str) -> Option<CookieSameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

#[async_trait]
impl IsolatedContext for ChromiumContext {
    async fn install_cookies(&mut self, cookies: &[StoredCookie]) -> Result<()> {
        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<Result<Vec<_>>>()?;
        self.page()?
            .set_cookies(params)
            .await
            .map_err(|e| browser_err("set cookies", e))?;
        Ok(())
    }

    async fn read_cookies(&mut self) -> Result<Vec<StoredCookie>> {
        let params = GetCookiesParams {
            urls: Some(COOKIE_URLS.iter().map(|u| u.to_string()).collect()),
        };
        let response = self
            .page()?
            .execute(params)
            .await
            .map_err(|e| browser_err("get cookies", e))?;

        Ok(response
            .result
            .cookies
            .iter()
            .map(|c| StoredCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: c.domain.clone(),
                path: c.path.clone(),
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.as_ref().map(|s| s.as_ref().to_string()),
            })
            .collect())
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let page = self.page.take();
        match self.context_id.take() {
            Some(context_id) => dispose(self.browser.clone(), context_id, page).await,
            None => Ok(()),
        }
    }
}
