//! Minimum spacing between repeated identical operations.
//!
//! Keys combine the operation name, the account it runs under and the target
//! video, so two accounts fetching the same video never throttle each other.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub operation: String,
    pub account: String,
    pub target: String,
}

impl OperationKey {
    pub fn new(
        operation: impl Into<String>,
        account: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            account: account.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.operation, self.account, self.target)
    }
}

/// Stamps older than their own interval are swept at most this often.
const SWEEP_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Stamp {
    at: Instant,
    interval: Duration,
}

#[derive(Clone)]
pub struct OperationRateLimiter {
    last_seen: Arc<DashMap<OperationKey, Stamp>>,
    last_sweep: Arc<Mutex<Instant>>,
}

impl Default for OperationRateLimiter {
    fn default() -> Self {
        Self {
            last_seen: Arc::new(DashMap::new()),
            last_sweep: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl OperationRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps `key` and succeeds when it was not seen within `min_interval`.
    /// A rejected call leaves the previous stamp untouched.
    pub fn check(&self, key: &OperationKey, min_interval: Duration) -> Result<()> {
        let now = Instant::now();
        self.sweep_if_due(now);

        match self.last_seen.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let elapsed = now.saturating_duration_since(entry.get().at);
                if elapsed < min_interval {
                    return Err(Error::RateLimited {
                        key: key.to_string(),
                        retry_after: min_interval - elapsed,
                    });
                }
                entry.insert(Stamp {
                    at: now,
                    interval: min_interval,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(Stamp {
                    at: now,
                    interval: min_interval,
                });
            }
        }
        Ok(())
    }

    // Runs before the entry lookup: `retain` must not overlap a held shard lock.
    fn sweep_if_due(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < SWEEP_EVERY {
            return;
        }
        *last = now;
        drop(last);
        self.prune_expired(now);
    }

    fn prune_expired(&self, now: Instant) {
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, stamp| now.saturating_duration_since(stamp.at) < stamp.interval);
        let dropped = before.saturating_sub(self.last_seen.len());
        if dropped > 0 {
            tracing::debug!("[ratelimit] dropped {} expired stamps", dropped);
        }
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
