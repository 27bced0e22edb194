//! Fixed-size pool of browser execution contexts.
//!
//! Checkout waits in arrival order on a fair semaphore. A checked-out context is
//! owned by a [`PooledContext`] guard that hands it back when dropped, so release
//! happens on success, error and cancellation alike.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use bilifetch_core::models::settings::BrowserSettings;

use crate::core::browser::{BackendLauncher, ContextProfile, ExecutionBackend, IsolatedContext};
use crate::error::{Error, Result};
use crate::storage::credentials::{Credential, CredentialStore, StoredCookie, BILI_JCT};

pub struct ExecutionContext {
    id: usize,
    backend: Box<dyn ExecutionBackend>,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(id: usize, backend: Box<dyn ExecutionBackend>) -> Self {
        let now = Utc::now();
        Self {
            id,
            backend,
            created_at: now,
            last_used: now,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    pub fn backend(&self) -> &dyn ExecutionBackend {
        self.backend.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub available: usize,
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub checkout_timeout: Duration,
    pub profile: ContextProfile,
    /// Account used when a session is requested without one.
    pub default_account: Option<String>,
}

impl PoolOptions {
    pub fn from_settings(settings: &BrowserSettings, default_account: Option<String>) -> Self {
        Self {
            checkout_timeout: Duration::from_secs(settings.checkout_timeout_secs),
            profile: ContextProfile::from(settings),
            default_account,
        }
    }
}

struct PoolInner {
    idle: Mutex<VecDeque<ExecutionContext>>,
    permits: Arc<Semaphore>,
    total: usize,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle_len(&self) -> usize {
        self.idle.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn checkin(&self, ctx: ExecutionContext) {
        if self.closed.load(Ordering::SeqCst) {
            shutdown_detached(ctx);
            return;
        }
        match self.idle.lock() {
            Ok(mut idle) => idle.push_back(ctx),
            Err(poisoned) => poisoned.into_inner().push_back(ctx),
        }
    }
}

fn shutdown_detached(ctx: ExecutionContext) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(e) = ctx.backend.shutdown().await {
                tracing::warn!("[pool] context {} shutdown failed: {}", ctx.id, e);
            }
        });
    }
}

/// Exclusive lease on one execution context.
pub struct PooledContext {
    ctx: Option<ExecutionContext>,
    inner: Arc<PoolInner>,
    // Released after the context is back in the idle queue.
    _permit: OwnedSemaphorePermit,
}

impl PooledContext {
    pub fn context(&self) -> &ExecutionContext {
        // Only `Drop` takes the context out.
        self.ctx.as_ref().unwrap_or_else(|| unreachable!("context taken before drop"))
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            tracing::debug!("[pool] context {} checked in", ctx.id);
            self.inner.checkin(ctx);
        }
    }
}

pub struct SessionPool {
    inner: Arc<PoolInner>,
    credentials: Arc<dyn CredentialStore>,
    options: PoolOptions,
}

impl SessionPool {
    /// Launches `size` backends up front. If any launch fails the ones already
    /// started are shut down again.
    pub async fn start(
        launcher: &dyn BackendLauncher,
        size: usize,
        credentials: Arc<dyn CredentialStore>,
        options: PoolOptions,
    ) -> Result<Self> {
        let mut contexts = Vec::with_capacity(size);
        for index in 0..size {
            match launcher.launch(index).await {
                Ok(backend) => contexts.push(ExecutionContext::new(index, backend)),
                Err(e) => {
                    for ctx in contexts {
                        let _ = ctx.backend.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }
        tracing::info!("[pool] initialised with {} contexts", size);
        Ok(Self::from_contexts(contexts, credentials, options))
    }

    pub fn from_contexts(
        contexts: Vec<ExecutionContext>,
        credentials: Arc<dyn CredentialStore>,
        options: PoolOptions,
    ) -> Self {
        let total = contexts.len();
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(contexts.into()),
                permits: Arc::new(Semaphore::new(total)),
                total,
                closed: AtomicBool::new(false),
            }),
            credentials,
            options,
        }
    }

    pub async fn checkout(&self, timeout: Duration) -> Result<PooledContext> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        let acquire = self.inner.permits.clone().acquire_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::PoolClosed),
            Err(_) => {
                tracing::warn!("[pool] checkout timed out after {:?}", timeout);
                return Err(Error::PoolExhausted { waited: timeout });
            }
        };

        let ctx = self
            .inner
            .idle
            .lock()
            .map_err(|_| Error::PoolClosed)?
            .pop_front();
        let mut ctx = ctx.ok_or(Error::PoolClosed)?;
        ctx.last_used = Utc::now();
        tracing::debug!("[pool] context {} checked out", ctx.id);

        Ok(PooledContext {
            ctx: Some(ctx),
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Checks out a context, opens an isolated sub-context in it and installs the
    /// account's saved cookies. `None` picks the configured or stored default.
    pub async fn create_authenticated_session(
        &self,
        account: Option<&str>,
    ) -> Result<AuthenticatedSession> {
        let lease = self.checkout(self.options.checkout_timeout).await?;
        let isolated = lease
            .context()
            .backend()
            .open_isolated(&self.options.profile)
            .await?;
        let context_id = lease.context().id();

        // From here on the session's drop closes the sub-context if this future
        // is abandoned before cookies are installed.
        let mut session = AuthenticatedSession {
            account: String::new(),
            isolated: Some(isolated),
            lease: Some(lease),
        };
        let prepared = match session.isolated.as_mut() {
            Some(isolated) => self.prepare(isolated.as_mut(), account).await,
            None => Err(Error::PoolClosed),
        };
        match prepared {
            Ok(account) => {
                tracing::info!("[session] opened for '{}' on context {}", account, context_id);
                session.account = account;
                Ok(session)
            }
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    tracing::debug!("[session] close after failure: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        isolated: &mut dyn IsolatedContext,
        account: Option<&str>,
    ) -> Result<String> {
        let account = match account.filter(|a| !a.is_empty()) {
            Some(name) => name.to_string(),
            None => match &self.options.default_account {
                Some(name) => name.clone(),
                None => self.credentials.default_account().await?,
            },
        };

        let cookies = self.credentials.load_cookies(&account).await?;
        if !cookies.iter().any(|c| c.name == BILI_JCT) {
            tracing::warn!("[session] cookie file for '{}' has no bili_jct", account);
        }
        isolated.install_cookies(&cookies).await?;
        Ok(account)
    }

    pub fn stats(&self) -> PoolStats {
        let closed = self.inner.closed.load(Ordering::SeqCst);
        let available = if closed { 0 } else { self.inner.idle_len() };
        PoolStats {
            total: self.inner.total,
            in_use: self.inner.total - self.inner.permits.available_permits().min(self.inner.total),
            available,
            closed,
        }
    }

    /// Rejects further checkouts and shuts down every idle context. Contexts still
    /// leased are shut down when they are checked in.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();

        let drained: Vec<ExecutionContext> = match self.inner.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for ctx in drained {
            if let Err(e) = ctx.backend.shutdown().await {
                tracing::warn!("[pool] context {} shutdown failed: {}", ctx.id, e);
            }
        }
        tracing::info!("[pool] closed");
    }
}

/// Short-lived authenticated view over one leased context.
pub struct AuthenticatedSession {
    account: String,
    isolated: Option<Box<dyn IsolatedContext>>,
    lease: Option<PooledContext>,
}

impl AuthenticatedSession {
    pub fn account(&self) -> &str {
        &self.account
    }

    pub async fn cookies(&mut self) -> Result<Vec<StoredCookie>> {
        match self.isolated.as_mut() {
            Some(ctx) => ctx.read_cookies().await,
            None => Err(Error::PoolClosed),
        }
    }

    pub async fn credential(&mut self) -> Result<Credential> {
        let cookies = self.cookies().await?;
        Credential::from_cookies(&self.account, &cookies)
    }

    /// Closes the isolated context and checks the execution context back in.
    pub async fn close(mut self) -> Result<()> {
        let result = match self.isolated.take() {
            Some(ctx) => ctx.close().await,
            None => Ok(()),
        };
        self.lease.take();
        tracing::debug!("[session] closed for '{}'", self.account);
        result
    }
}

impl Drop for AuthenticatedSession {
    fn drop(&mut self) {
        let Some(isolated) = self.isolated.take() else {
            return;
        };
        // Keep the lease until the sub-context is gone.
        let lease = self.lease.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = isolated.close().await;
                    drop(lease);
                });
            }
            Err(_) => drop(lease),
        }
    }
}
