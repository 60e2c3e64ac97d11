use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorDetails};
use crate::storage::{FeatureEvent, UsageStore};
use crate::usage_limit::{Feature, Limit, PlanLimits, PlanLimitsTable, PlanTier, UsageLimitDecision};

/// The `[usage_limits]` section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageLimiterConfig {
    /// TTL for cached plan tiers (in milliseconds)
    #[serde(default = "default_tier_cache_ttl_ms")]
    pub tier_cache_ttl_ms: u64,
    /// Maximum number of cached plan tiers
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: u64,
    /// Whether to fail open (allow) or closed (error) when storage is unavailable
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
}

fn default_tier_cache_ttl_ms() -> u64 {
    30_000
}

fn default_max_cache_size() -> u64 {
    10_000
}

fn default_fail_open() -> bool {
    true
}

impl Default for UsageLimiterConfig {
    fn default() -> Self {
        Self {
            tier_cache_ttl_ms: default_tier_cache_ttl_ms(),
            max_cache_size: default_max_cache_size(),
            fail_open: default_fail_open(),
        }
    }
}

/// Metrics for usage limiter
#[derive(Debug, Default)]
pub struct UsageLimiterMetrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub storage_errors: AtomicU64,
    pub denied_requests: AtomicU64,
}

impl UsageLimiterMetrics {
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied_requests.fetch_add(1, Ordering::Relaxed);
    }
}

/// Quota state of one feature for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageCheck {
    pub feature: Feature,
    /// Unknown when the check failed open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<PlanTier>,
    pub limit: Limit,
    pub current_usage: u64,
    pub remaining: Limit,
    pub allowed: bool,
    /// Set when storage was unavailable and the check failed open
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl UsageCheck {
    fn evaluate(feature: Feature, tier: PlanTier, limit: Limit, current_usage: u64) -> Self {
        Self {
            feature,
            tier: Some(tier),
            limit,
            current_usage,
            remaining: limit.remaining(current_usage),
            allowed: limit.allows(current_usage, 1),
            degraded: false,
        }
    }

    fn fail_open(feature: Feature) -> Self {
        Self {
            feature,
            tier: None,
            limit: Limit::Unlimited,
            current_usage: 0,
            remaining: Limit::Unlimited,
            allowed: true,
            degraded: true,
        }
    }

    /// The state after one more use has been recorded
    fn after_use(&self) -> Self {
        match self.tier {
            Some(tier) if !self.degraded => {
                Self::evaluate(self.feature, tier, self.limit, self.current_usage + 1)
            }
            _ => self.clone(),
        }
    }

    pub fn decision(&self) -> UsageLimitDecision {
        if self.allowed {
            UsageLimitDecision::Allow
        } else {
            let plan = match self.tier {
                Some(tier) => format!("{tier} plan"),
                None => "Plan".to_string(),
            };
            UsageLimitDecision::Deny {
                reason: format!(
                    "{plan} allows {} `{}` and {} are used",
                    self.limit.as_i64(),
                    self.feature,
                    self.current_usage
                ),
            }
        }
    }
}

/// All counted features of one user. Each count is an independent read.
///
/// `tier` and `limits` are left out when the plan could not be loaded.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<PlanTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<PlanLimits>,
    pub usage: Vec<UsageCheck>,
}

/// Plan-tier quota checks backed by feature event counts
pub struct UsageLimiter {
    store: Arc<dyn UsageStore>,
    plans: Arc<PlanLimitsTable>,
    /// Plan tier per user
    tier_cache: Cache<String, PlanTier>,
    config: UsageLimiterConfig,
    metrics: Arc<UsageLimiterMetrics>,
}

impl UsageLimiter {
    pub fn new(
        store: Arc<dyn UsageStore>,
        plans: PlanLimitsTable,
        config: UsageLimiterConfig,
    ) -> Self {
        let tier_cache = Cache::builder()
            .max_capacity(config.max_cache_size)
            .time_to_live(Duration::from_millis(config.tier_cache_ttl_ms))
            .build();

        Self {
            store,
            plans: Arc::new(plans),
            tier_cache,
            config,
            metrics: Arc::new(UsageLimiterMetrics::default()),
        }
    }

    pub fn plans(&self) -> &PlanLimitsTable {
        &self.plans
    }

    pub fn metrics(&self) -> &UsageLimiterMetrics {
        &self.metrics
    }

    /// The user's plan tier; users without an assignment are on the free tier
    pub async fn get_tier(&self, user_id: &str) -> Result<PlanTier, Error> {
        if let Some(tier) = self.tier_cache.get(user_id).await {
            self.metrics.record_cache_hit();
            return Ok(tier);
        }

        self.metrics.record_cache_miss();
        let tier = self
            .store
            .get_plan_tier(user_id)
            .await?
            .unwrap_or_default();
        self.tier_cache.insert(user_id.to_string(), tier).await;
        Ok(tier)
    }

    pub async fn set_plan(&self, user_id: &str, tier: PlanTier) -> Result<(), Error> {
        self.store.set_plan_tier(user_id, tier).await?;
        self.tier_cache.insert(user_id.to_string(), tier).await;
        info!(user_id, tier = %tier, "Plan tier updated");
        Ok(())
    }

    pub async fn check_usage(&self, user_id: &str, feature: Feature) -> Result<UsageCheck, Error> {
        self.check_usage_at(user_id, feature, Utc::now()).await
    }

    pub(crate) async fn check_usage_at(
        &self,
        user_id: &str,
        feature: Feature,
        now: DateTime<Utc>,
    ) -> Result<UsageCheck, Error> {
        let check = match self.evaluate(user_id, feature, now).await {
            Ok(check) => check,
            Err(e) => {
                self.metrics.record_storage_error();
                if !self.config.fail_open {
                    return Err(e);
                }
                warn!(
                    user_id,
                    feature = %feature,
                    "Usage check failed, allowing request: {e}"
                );
                UsageCheck::fail_open(feature)
            }
        };

        metrics::counter!("usage_checks", "feature" => feature.to_string()).increment(1);
        debug!(
            user_id,
            feature = %feature,
            current_usage = check.current_usage,
            remaining = check.remaining.as_i64(),
            allowed = check.allowed,
            "Usage check"
        );
        Ok(check)
    }

    async fn evaluate(
        &self,
        user_id: &str,
        feature: Feature,
        now: DateTime<Utc>,
    ) -> Result<UsageCheck, Error> {
        let tier = self.get_tier(user_id).await?;
        let limit = self.plans.get(tier).limit_for(feature);
        let current_usage = self
            .store
            .count_feature_events(user_id, feature, feature.counted_since(now))
            .await?;
        Ok(UsageCheck::evaluate(feature, tier, limit, current_usage))
    }

    pub async fn usage_snapshot(&self, user_id: &str) -> Result<UsageSnapshot, Error> {
        self.usage_snapshot_at(user_id, Utc::now()).await
    }

    pub(crate) async fn usage_snapshot_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, Error> {
        let tier = match self.get_tier(user_id).await {
            Ok(tier) => Some(tier),
            Err(e) if self.config.fail_open => {
                warn!(user_id, "Failed to load plan tier, snapshot is degraded: {e}");
                None
            }
            Err(e) => return Err(e),
        };

        let (strategies, exports, saved_items, ai_insights) = tokio::join!(
            self.check_usage_at(user_id, Feature::Strategies, now),
            self.check_usage_at(user_id, Feature::Exports, now),
            self.check_usage_at(user_id, Feature::SavedItems, now),
            self.check_usage_at(user_id, Feature::AiInsights, now),
        );

        Ok(UsageSnapshot {
            user_id: user_id.to_string(),
            tier,
            limits: tier.map(|tier| self.plans.get(tier)),
            usage: vec![strategies?, exports?, saved_items?, ai_insights?],
        })
    }

    /// Append one usage event without checking the quota
    pub async fn record_event(
        &self,
        user_id: &str,
        feature: Feature,
    ) -> Result<FeatureEvent, Error> {
        let event = FeatureEvent::new(user_id, feature, Utc::now());
        self.store.insert_feature_event(&event).await?;
        Ok(event)
    }

    /// Check the quota and, if there is room, record one use.
    ///
    /// Check and record are separate reads and writes, so concurrent callers
    /// can overrun a quota by the number of requests in flight.
    pub async fn record_event_if_allowed(
        &self,
        user_id: &str,
        feature: Feature,
    ) -> Result<(UsageCheck, FeatureEvent), Error> {
        let check = self.check_usage(user_id, feature).await?;

        if let UsageLimitDecision::Deny { reason } = check.decision() {
            self.metrics.record_denied();
            metrics::counter!("usage_quota_denied", "feature" => feature.to_string()).increment(1);
            info!(user_id, "Usage quota exhausted: {reason}");
            return Err(Error::new_without_logging(ErrorDetails::QuotaExceeded {
                feature: feature.to_string(),
                limit: check.limit.as_i64(),
                current_usage: check.current_usage,
            }));
        }

        let event = self.record_event(user_id, feature).await?;
        Ok((check.after_use(), event))
    }
}
