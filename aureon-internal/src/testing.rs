#![cfg(test)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::AppStateData;
use crate::storage::{
    AiUsageRecord, FeatureEvent, MemoryStorage, StorageBackend, UsageLedger, UsageStore,
};
use crate::usage_limit::{Feature, PlanTier};

/// Storage whose every operation fails, for exercising fail-open paths
pub struct FailingStorage;

fn unavailable() -> Error {
    Error::new(ErrorDetails::Storage {
        message: "storage unavailable".to_string(),
    })
}

#[async_trait]
impl UsageLedger for FailingStorage {
    async fn insert_ai_usage(&self, _record: &AiUsageRecord) -> Result<(), Error> {
        Err(unavailable())
    }

    async fn sum_cost_since(&self, _user_id: &str, _since: DateTime<Utc>) -> Result<f64, Error> {
        Err(unavailable())
    }

    async fn list_ai_usage_since(
        &self,
        _user_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<AiUsageRecord>, Error> {
        Err(unavailable())
    }

    async fn health(&self) -> Result<(), Error> {
        Err(unavailable())
    }
}

#[async_trait]
impl UsageStore for FailingStorage {
    async fn get_plan_tier(&self, _user_id: &str) -> Result<Option<PlanTier>, Error> {
        Err(unavailable())
    }

    async fn set_plan_tier(&self, _user_id: &str, _tier: PlanTier) -> Result<(), Error> {
        Err(unavailable())
    }

    async fn insert_feature_event(&self, _event: &FeatureEvent) -> Result<(), Error> {
        Err(unavailable())
    }

    async fn count_feature_events(
        &self,
        _user_id: &str,
        _feature: Feature,
        _since: Option<DateTime<Utc>>,
    ) -> Result<u64, Error> {
        Err(unavailable())
    }
}

pub fn get_unit_test_app_state_data(config: Config, storage_healthy: bool) -> AppStateData {
    let storage = if storage_healthy {
        let storage = Arc::new(MemoryStorage::default());
        StorageBackend {
            ledger: storage.clone(),
            store: storage,
            kind: "memory",
        }
    } else {
        let storage = Arc::new(FailingStorage);
        StorageBackend {
            ledger: storage.clone(),
            store: storage,
            kind: "failing",
        }
    };
    AppStateData::new_with_storage(Arc::new(config), storage)
}
