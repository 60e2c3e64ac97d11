use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::calendar::now_ms;
use crate::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitHeaders, RateLimiterMetrics};

/// Counter for one identifier within its current window
#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_reset_at_ms: u64,
}

/// Outcome of a single `check`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (milliseconds) at which the current window ends
    pub reset_time: u64,
}

impl RateLimitResult {
    /// Whole seconds until the window resets, never less than one
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_time.saturating_sub(now_ms).div_ceil(1000).max(1)
    }

    pub fn to_decision(&self, now_ms: u64) -> RateLimitDecision {
        let mut headers = RateLimitHeaders {
            limit: self.limit,
            remaining: self.remaining,
            reset: self.reset_time.div_ceil(1000),
            retry_after: None,
        };
        if self.allowed {
            RateLimitDecision::Allow(headers)
        } else {
            headers.retry_after = Some(self.retry_after_secs(now_ms));
            RateLimitDecision::Deny(headers)
        }
    }
}

/// Process-local fixed-window rate limiter.
///
/// Each identifier gets a counter that starts with its first request and resets
/// `window_ms` later. State is not shared across processes and is lost on restart.
pub struct FixedWindowRateLimiter {
    entries: Arc<DashMap<String, RateLimitEntry>>,

    /// Background sweep handle
    sweep_handle: Arc<RwLock<Option<JoinHandle<()>>>>,

    metrics: Arc<RateLimiterMetrics>,
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedWindowRateLimiter {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            sweep_handle: Arc::new(RwLock::new(None)),
            metrics: Arc::new(RateLimiterMetrics::default()),
        }
    }

    /// Count a request from `identifier` against `config`
    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitResult {
        self.check_at(identifier, config, now_ms())
    }

    pub(crate) fn check_at(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        now_ms: u64,
    ) -> RateLimitResult {
        self.metrics.record_check();
        let fresh_reset = now_ms.saturating_add(config.window_ms);

        if config.max_requests == 0 {
            self.metrics.record_rate_limit_exceeded();
            return RateLimitResult {
                allowed: false,
                limit: 0,
                remaining: 0,
                reset_time: fresh_reset,
            };
        }

        let start_window = |metrics: &RateLimiterMetrics| {
            metrics.record_window_started();
            (
                RateLimitEntry {
                    count: 1,
                    window_reset_at_ms: fresh_reset,
                },
                RateLimitResult {
                    allowed: true,
                    limit: config.max_requests,
                    remaining: config.max_requests - 1,
                    reset_time: fresh_reset,
                },
            )
        };

        // The shard lock is held for the whole read-modify-write of this key
        match self.entries.entry(identifier.to_string()) {
            Entry::Vacant(vacant) => {
                let (entry, result) = start_window(&self.metrics);
                vacant.insert(entry);
                result
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now_ms >= entry.window_reset_at_ms {
                    let (fresh, result) = start_window(&self.metrics);
                    *entry = fresh;
                    result
                } else if entry.count >= config.max_requests {
                    self.metrics.record_rate_limit_exceeded();
                    RateLimitResult {
                        allowed: false,
                        limit: config.max_requests,
                        remaining: 0,
                        reset_time: entry.window_reset_at_ms,
                    }
                } else {
                    entry.count += 1;
                    RateLimitResult {
                        allowed: true,
                        limit: config.max_requests,
                        remaining: config.max_requests - entry.count,
                        reset_time: entry.window_reset_at_ms,
                    }
                }
            }
        }
    }

    /// Remove every entry whose window has ended. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.entries, &self.metrics, now_ms())
    }

    /// Number of identifiers currently tracked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> &RateLimiterMetrics {
        &self.metrics
    }

    /// Start evicting expired windows every `every`. Replaces a running sweeper.
    pub async fn start_sweeper(&self, every: Duration) {
        let entries = Arc::clone(&self.entries);
        let metrics = Arc::clone(&self.metrics);

        let handle = tokio::spawn(async move {
            let mut sweep_interval = interval(every);
            sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            sweep_interval.tick().await;

            loop {
                sweep_interval.tick().await;
                let removed = sweep(&entries, &metrics, now_ms());
                if removed > 0 {
                    debug!(removed, remaining = entries.len(), "Swept expired rate limit windows");
                }
            }
        });

        if let Some(previous) = self.sweep_handle.write().await.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background sweeper
    pub async fn stop_sweeper(&self) {
        if let Some(handle) = self.sweep_handle.write().await.take() {
            handle.abort();
        }
    }
}

fn sweep(
    entries: &DashMap<String, RateLimitEntry>,
    metrics: &RateLimiterMetrics,
    now_ms: u64,
) -> usize {
    let mut removed = 0;
    entries.retain(|_, entry| {
        let keep = entry.window_reset_at_ms > now_ms;
        if !keep {
            removed += 1;
        }
        keep
    });
    metrics.record_entries_swept(removed as u64);
    removed
}
