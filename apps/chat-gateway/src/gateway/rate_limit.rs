//! Fixed-window, per-identity rate limiting.
//!
//! Each traffic class gets its own [`RateLimiter`] so private and live
//! traffic never share counters. Windows live in process memory only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::config::{Config, RateSettings};

use super::envelope::ChatMode;

/// Idle windows older than this (past their reset) are swept.
pub const SWEEP_GRACE: Duration = Duration::from_secs(5 * 60);

/// How often the background sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

pub struct RateLimiter {
    prefix: &'static str,
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(prefix: &'static str, settings: RateSettings) -> Self {
        Self {
            prefix,
            max_requests: settings.max_requests,
            window: settings.window,
            windows: DashMap::new(),
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    pub fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Instant::now())
    }

    /// Count one request for `identity` at `now`. Returns false once the
    /// identity has used `max_requests` in the current window.
    pub fn allow_at(&self, identity: &str, now: Instant) -> bool {
        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert(RateWindow {
                count: 0,
                reset_at: now + self.window,
            });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        if entry.count < self.max_requests {
            entry.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop windows that expired more than `grace` ago. Returns how many were
    /// removed.
    pub fn cleanup(&self, grace: Duration) -> usize {
        self.cleanup_at(Instant::now(), grace)
    }

    fn cleanup_at(&self, now: Instant, grace: Duration) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.reset_at + grace > now);
        before - self.windows.len()
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

/// One limiter per chat mode.
pub struct LimiterSet {
    pub live: RateLimiter,
    pub private: RateLimiter,
}

impl LimiterSet {
    pub fn from_config(config: &Config) -> Self {
        Self {
            live: RateLimiter::new("live", config.live_rate),
            private: RateLimiter::new("private", config.private_rate),
        }
    }

    pub fn for_mode(&self, mode: ChatMode) -> &RateLimiter {
        match mode {
            ChatMode::Live => &self.live,
            ChatMode::Private => &self.private,
        }
    }

    /// Spawn the periodic sweeper. The task ends when the set is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiters = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiters) = limiters.upgrade() else {
                    break;
                };
                let removed =
                    limiters.live.cleanup(SWEEP_GRACE) + limiters.private.cleanup(SWEEP_GRACE);
                if removed > 0 {
                    tracing::debug!(removed, "swept idle rate-limit windows");
                }
            }
        })
    }
}
