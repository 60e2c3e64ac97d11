use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::storage::{AiUsageRecord, FeatureEvent, UsageLedger, UsageStore};
use crate::usage_limit::{Feature, PlanTier};

/// Process-local storage, used by default and in tests
#[derive(Debug, Default)]
pub struct MemoryStorage {
    ai_usage: RwLock<Vec<AiUsageRecord>>,
    feature_events: RwLock<Vec<FeatureEvent>>,
    plans: DashMap<String, PlanTier>,
}

#[async_trait]
impl UsageLedger for MemoryStorage {
    async fn insert_ai_usage(&self, record: &AiUsageRecord) -> Result<(), Error> {
        self.ai_usage.write().await.push(record.clone());
        Ok(())
    }

    async fn sum_cost_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<f64, Error> {
        Ok(self
            .ai_usage
            .read()
            .await
            .iter()
            .filter(|record| record.user_id == user_id && record.timestamp >= since)
            .map(|record| record.cost_usd)
            .sum())
    }

    async fn list_ai_usage_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AiUsageRecord>, Error> {
        let mut records: Vec<AiUsageRecord> = self
            .ai_usage
            .read()
            .await
            .iter()
            .filter(|record| record.user_id == user_id && record.timestamp >= since)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.timestamp);
        Ok(records)
    }

    async fn health(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStorage {
    async fn get_plan_tier(&self, user_id: &str) -> Result<Option<PlanTier>, Error> {
        Ok(self.plans.get(user_id).map(|entry| *entry.value()))
    }

    async fn set_plan_tier(&self, user_id: &str, tier: PlanTier) -> Result<(), Error> {
        self.plans.insert(user_id.to_string(), tier);
        Ok(())
    }

    async fn insert_feature_event(&self, event: &FeatureEvent) -> Result<(), Error> {
        self.feature_events.write().await.push(event.clone());
        Ok(())
    }

    async fn count_feature_events(
        &self,
        user_id: &str,
        feature: Feature,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, Error> {
        Ok(self
            .feature_events
            .read()
            .await
            .iter()
            .filter(|event| {
                event.user_id == user_id
                    && event.feature == feature
                    && since.is_none_or(|since| event.timestamp >= since)
            })
            .count() as u64)
    }
}
