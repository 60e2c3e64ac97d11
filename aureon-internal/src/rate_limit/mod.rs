pub mod config;
pub mod limiter;
pub mod middleware;
pub mod store;

pub use config::{EndpointClass, GlobalRateLimitConfig, RateLimitConfig};
pub use limiter::{FixedWindowRateLimiter, RateLimitResult};
pub use middleware::{
    enforce_rate_limit, extract_client_identifier, rate_limit_middleware, RateLimitLayerState,
    RateLimitRejection,
};
pub use store::RateLimiterStore;

use axum::http::{HeaderMap, HeaderValue};
use std::sync::atomic::{AtomicU64, Ordering};

/// Headers returned with rate limit information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,               // Unix timestamp (seconds)
    pub retry_after: Option<u64>, // Seconds
}

impl RateLimitHeaders {
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(self.remaining));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(self.reset));

        if let Some(retry_after) = self.retry_after {
            headers.insert("Retry-After", HeaderValue::from(retry_after));
        }

        headers
    }
}

/// Result of a rate limit check
#[derive(Debug)]
pub enum RateLimitDecision {
    Allow(RateLimitHeaders),
    Deny(RateLimitHeaders),
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow(_))
    }

    pub fn headers(&self) -> &RateLimitHeaders {
        match self {
            RateLimitDecision::Allow(h) | RateLimitDecision::Deny(h) => h,
        }
    }
}

/// Counters for the in-process limiter
#[derive(Debug, Default)]
pub struct RateLimiterMetrics {
    pub checks: AtomicU64,
    pub windows_started: AtomicU64,
    pub rate_limit_exceeded: AtomicU64,
    pub entries_swept: AtomicU64,
}

impl RateLimiterMetrics {
    pub fn record_check(&self) {
        self.checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_started(&self) {
        self.windows_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_exceeded(&self) {
        self.rate_limit_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entries_swept(&self, count: u64) {
        self.entries_swept.fetch_add(count, Ordering::Relaxed);
    }
}
