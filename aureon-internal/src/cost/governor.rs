use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calendar::{days_elapsed_in_month, days_in_month, start_of_month};
use crate::cost::pricing::{ModelPricing, PriceTable};
use crate::error::{Error, ErrorDetails};
use crate::storage::{AiUsageRecord, UsageLedger};

/// The `[cost_governor]` section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostGovernorConfig {
    /// Per-user AI spend cap for one calendar month (UTC), in USD
    #[serde(default = "default_monthly_hard_limit_usd")]
    pub monthly_hard_limit_usd: f64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    /// Whether budget checks allow requests when the ledger cannot be read
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    /// Pricing for models missing from the price table
    #[serde(default = "default_fallback_pricing")]
    pub fallback_pricing: ModelPricing,
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,
}

fn default_monthly_hard_limit_usd() -> f64 {
    50.0
}

fn default_warning_threshold() -> f64 {
    0.7
}

fn default_critical_threshold() -> f64 {
    0.9
}

fn default_fail_open() -> bool {
    true
}

fn default_fallback_pricing() -> ModelPricing {
    ModelPricing::per_1k(0.01, 0.03)
}

impl Default for CostGovernorConfig {
    fn default() -> Self {
        Self {
            monthly_hard_limit_usd: default_monthly_hard_limit_usd(),
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            fail_open: default_fail_open(),
            fallback_pricing: default_fallback_pricing(),
            models: HashMap::new(),
        }
    }
}

impl CostGovernorConfig {
    pub fn verify(&self) -> Result<(), Error> {
        if !self.monthly_hard_limit_usd.is_finite() || self.monthly_hard_limit_usd <= 0.0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`cost_governor.monthly_hard_limit_usd` must be greater than 0"
                    .to_string(),
            }));
        }

        let thresholds_ordered = 0.0 < self.warning_threshold
            && self.warning_threshold <= self.critical_threshold
            && self.critical_threshold <= 1.0;
        if !thresholds_ordered {
            return Err(Error::new(ErrorDetails::Config {
                message: format!(
                    "`cost_governor` thresholds must satisfy 0 < warning_threshold <= critical_threshold <= 1 (got {} and {})",
                    self.warning_threshold, self.critical_threshold
                ),
            }));
        }

        self.fallback_pricing
            .verify("cost_governor.fallback_pricing")?;
        for (model, pricing) in &self.models {
            pricing.verify(&format!("cost_governor.models.{model}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub current_spend: f64,
    pub limit: f64,
    /// Set when the ledger could not be read and the fail-open policy decided
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStats {
    pub user_id: String,
    pub current_spend: f64,
    pub limit: f64,
    pub remaining: f64,
    pub percent_used: f64,
    pub days_elapsed: u32,
    pub days_in_month: u32,
    pub projected_spend: f64,
    pub status: BudgetStatus,
    /// Spend of the current month per feature tag
    pub by_feature: BTreeMap<String, f64>,
}

/// Monthly AI spend accounting on top of the usage ledger
pub struct CostGovernor {
    ledger: Arc<dyn UsageLedger>,
    prices: PriceTable,
    config: CostGovernorConfig,
}

impl CostGovernor {
    pub fn new(ledger: Arc<dyn UsageLedger>, config: CostGovernorConfig) -> Self {
        let prices = PriceTable::new(&config.models, config.fallback_pricing);
        Self {
            ledger,
            prices,
            config,
        }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn monthly_limit(&self) -> f64 {
        self.config.monthly_hard_limit_usd
    }

    /// Whether the user still has budget this month.
    ///
    /// Advisory only: concurrent calls may all pass before their usage lands in the ledger.
    pub async fn check_budget(&self, user_id: &str) -> BudgetCheck {
        self.check_budget_at(user_id, Utc::now()).await
    }

    pub(crate) async fn check_budget_at(&self, user_id: &str, now: DateTime<Utc>) -> BudgetCheck {
        let limit = self.config.monthly_hard_limit_usd;
        let check = match self.ledger.sum_cost_since(user_id, start_of_month(now)).await {
            Ok(current_spend) => BudgetCheck {
                allowed: current_spend < limit,
                current_spend,
                limit,
                degraded: false,
            },
            Err(e) => {
                warn!(
                    user_id,
                    fail_open = self.config.fail_open,
                    "Failed to read AI spend, budget check degraded: {e}"
                );
                BudgetCheck {
                    allowed: self.config.fail_open,
                    current_spend: 0.0,
                    limit,
                    degraded: true,
                }
            }
        };

        let result = if check.allowed { "allowed" } else { "denied" };
        metrics::counter!("budget_checks", "result" => result).increment(1);
        if !check.allowed && !check.degraded {
            info!(
                user_id,
                current_spend = check.current_spend,
                limit,
                "Monthly AI budget exhausted"
            );
        }
        check
    }

    /// Price one AI call and append it to the ledger.
    ///
    /// Never fails: usage that cannot be recorded is logged and dropped.
    pub async fn track_usage(
        &self,
        user_id: &str,
        model: &str,
        tokens_input: u64,
        tokens_output: u64,
        feature: &str,
    ) {
        match self
            .record_usage(user_id, model, tokens_input, tokens_output, feature, Utc::now())
            .await
        {
            Ok(record) => {
                metrics::counter!("ai_usage_tracked", "model" => model.to_string()).increment(1);
                debug!(
                    user_id,
                    model,
                    feature,
                    cost_usd = record.cost_usd,
                    "Tracked AI usage"
                );
            }
            Err(e) => {
                metrics::counter!("ai_usage_tracking_failures").increment(1);
                warn!(user_id, model, feature, "Failed to track AI usage: {e}");
            }
        }
    }

    pub async fn record_usage(
        &self,
        user_id: &str,
        model: &str,
        tokens_input: u64,
        tokens_output: u64,
        feature: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<AiUsageRecord, Error> {
        let cost_usd = self.prices.cost(model, tokens_input, tokens_output);
        if !cost_usd.is_finite() {
            return Err(Error::new(ErrorDetails::InternalError {
                message: format!("Computed a non-finite cost for model `{model}`"),
            }));
        }

        let record = AiUsageRecord {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            model: model.to_string(),
            tokens_input,
            tokens_output,
            cost_usd,
            feature: feature.to_string(),
            timestamp,
        };
        self.ledger.insert_ai_usage(&record).await?;
        Ok(record)
    }

    pub async fn get_budget_stats(&self, user_id: &str) -> Result<BudgetStats, Error> {
        self.get_budget_stats_at(user_id, Utc::now()).await
    }

    pub(crate) async fn get_budget_stats_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BudgetStats, Error> {
        let records = self.list_usage_at(user_id, now).await?;

        let mut by_feature = BTreeMap::new();
        let mut current_spend = 0.0;
        for record in &records {
            current_spend += record.cost_usd;
            *by_feature.entry(record.feature.clone()).or_insert(0.0) += record.cost_usd;
        }

        let limit = self.config.monthly_hard_limit_usd;
        let days_elapsed = days_elapsed_in_month(now);
        let days_in_month = days_in_month(now);
        let used_fraction = current_spend / limit;

        let status = if used_fraction >= self.config.critical_threshold {
            BudgetStatus::Critical
        } else if used_fraction >= self.config.warning_threshold {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Healthy
        };

        Ok(BudgetStats {
            user_id: user_id.to_string(),
            current_spend,
            limit,
            remaining: (limit - current_spend).max(0.0),
            percent_used: used_fraction * 100.0,
            days_elapsed,
            days_in_month,
            projected_spend: current_spend / f64::from(days_elapsed) * f64::from(days_in_month),
            status,
            by_feature,
        })
    }

    /// The user's ledger rows of the current month, oldest first
    pub async fn list_usage(&self, user_id: &str) -> Result<Vec<AiUsageRecord>, Error> {
        self.list_usage_at(user_id, Utc::now()).await
    }

    pub(crate) async fn list_usage_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AiUsageRecord>, Error> {
        self.ledger
            .list_ai_usage_since(user_id, start_of_month(now))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::testing::FailingStorage;
    use chrono::TimeZone;
    use tracing_test::traced_test;

    fn june(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
    }

    async fn spend(
        governor: &CostGovernor,
        user_id: &str,
        cost: f64,
        feature: &str,
        at: DateTime<Utc>,
    ) {
        governor
            .ledger
            .insert_ai_usage(&AiUsageRecord {
                id: Uuid::now_v7(),
                user_id: user_id.to_string(),
                model: "test".to_string(),
                tokens_input: 1000,
                tokens_output: 0,
                cost_usd: cost,
                feature: feature.to_string(),
                timestamp: at,
            })
            .await
            .unwrap();
    }

    fn governor() -> CostGovernor {
        CostGovernor::new(Arc::new(MemoryStorage::default()), CostGovernorConfig::default())
    }

    #[tokio::test]
    async fn test_hard_limit() {
        let governor = governor();
        for cost in [10.0, 15.0, 20.0] {
            spend(&governor, "u", cost, "strategy", june(3)).await;
        }

        let check = governor.check_budget_at("u", june(10)).await;
        assert_eq!(check.current_spend, 45.0);
        assert_eq!(check.limit, 50.0);
        assert!(check.allowed);

        spend(&governor, "u", 10.0, "strategy", june(4)).await;
        let check = governor.check_budget_at("u", june(10)).await;
        assert_eq!(check.current_spend, 55.0);
        assert!(!check.allowed);
        assert!(!check.degraded);
    }

    #[tokio::test]
    async fn test_spend_exactly_at_limit_is_denied() {
        let governor = governor();
        spend(&governor, "u", 50.0, "strategy", june(1)).await;
        assert!(!governor.check_budget_at("u", june(1)).await.allowed);
    }

    #[tokio::test]
    async fn test_previous_months_do_not_count() {
        let governor = governor();
        let may = Utc.with_ymd_and_hms(2024, 5, 31, 23, 59, 59).unwrap();
        spend(&governor, "u", 49.0, "strategy", may).await;
        spend(&governor, "u", 1.0, "strategy", june(1)).await;

        let check = governor.check_budget_at("u", june(2)).await;
        assert_eq!(check.current_spend, 1.0);
        assert!(check.allowed);
        assert_eq!(governor.list_usage_at("u", june(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_track_usage_persists_priced_record() {
        let governor = governor();
        governor
            .track_usage("u", "gpt-4", 2000, 1000, "strategy")
            .await;

        let records = governor.list_usage("u").await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.model, "gpt-4");
        assert_eq!(record.tokens_input, 2000);
        assert_eq!(record.tokens_output, 1000);
        assert!((record.cost_usd - (2.0 * 0.03 + 1.0 * 0.06)).abs() < 1e-9);
        assert_eq!(record.feature, "strategy");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_track_usage_fails_open() {
        let governor = CostGovernor::new(Arc::new(FailingStorage), CostGovernorConfig::default());
        // Must not panic or surface the error
        governor
            .track_usage("u", "gpt-4o", 100, 100, "insights")
            .await;
        assert!(logs_contain("Failed to track AI usage"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_check_budget_degrades_on_ledger_failure() {
        let open = CostGovernor::new(Arc::new(FailingStorage), CostGovernorConfig::default());
        let check = open.check_budget("u").await;
        assert!(check.allowed);
        assert!(check.degraded);
        assert!(logs_contain("budget check degraded"));

        let closed = CostGovernor::new(
            Arc::new(FailingStorage),
            CostGovernorConfig {
                fail_open: false,
                ..Default::default()
            },
        );
        let check = closed.check_budget("u").await;
        assert!(!check.allowed);
        assert!(check.degraded);
    }

    #[tokio::test]
    async fn test_budget_stats() {
        let governor = governor();
        spend(&governor, "u", 20.0, "strategy", june(2)).await;
        spend(&governor, "u", 10.0, "insights", june(5)).await;
        spend(&governor, "u", 6.0, "strategy", june(9)).await;

        let stats = governor.get_budget_stats_at("u", june(10)).await.unwrap();
        assert_eq!(stats.current_spend, 36.0);
        assert_eq!(stats.remaining, 14.0);
        assert!((stats.percent_used - 72.0).abs() < 1e-9);
        assert_eq!(stats.days_elapsed, 10);
        assert_eq!(stats.days_in_month, 30);
        assert!((stats.projected_spend - 108.0).abs() < 1e-9);
        assert_eq!(stats.status, BudgetStatus::Warning);
        assert_eq!(stats.by_feature["strategy"], 26.0);
        assert_eq!(stats.by_feature["insights"], 10.0);
    }

    #[tokio::test]
    async fn test_budget_status_thresholds() {
        let governor = governor();
        let stats = governor.get_budget_stats_at("u", june(1)).await.unwrap();
        assert_eq!(stats.status, BudgetStatus::Healthy);
        assert_eq!(stats.projected_spend, 0.0);
        assert_eq!(stats.days_elapsed, 1);

        spend(&governor, "u", 45.0, "strategy", june(1)).await;
        let stats = governor.get_budget_stats_at("u", june(1)).await.unwrap();
        assert_eq!(stats.status, BudgetStatus::Critical);

        spend(&governor, "u", 10.0, "strategy", june(1)).await;
        let stats = governor.get_budget_stats_at("u", june(1)).await.unwrap();
        assert_eq!(stats.remaining, 0.0);
        assert_eq!(stats.status, BudgetStatus::Critical);
        assert_eq!(
            serde_json::to_value(&stats).unwrap()["status"],
            "CRITICAL"
        );
    }

    #[test]
    fn test_config_verification() {
        CostGovernorConfig::default().verify().unwrap();

        let config = CostGovernorConfig {
            monthly_hard_limit_usd: 0.0,
            ..Default::default()
        };
        assert!(config.verify().is_err());

        let config = CostGovernorConfig {
            warning_threshold: 0.95,
            critical_threshold: 0.9,
            ..Default::default()
        };
        assert!(config.verify().is_err());

        let config: CostGovernorConfig = toml::from_str(
            r#"
            monthly_hard_limit_usd = 25.0
            [models.my-model]
            type = "per_unit"
            unit_cost = 0.5
            "#,
        )
        .unwrap();
        config.verify().unwrap();
        assert_eq!(config.warning_threshold, 0.7);
        assert_eq!(
            config.models["my-model"],
            ModelPricing::per_unit(0.5)
        );
    }
}
