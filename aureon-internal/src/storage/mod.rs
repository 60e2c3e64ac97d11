//! Persistence for the AI usage ledger, feature events and plan assignments.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::usage_limit::{Feature, PlanTier};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// One priced AI call. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiUsageRecord {
    pub id: Uuid,
    pub user_id: String,
    pub model: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost_usd: f64,
    pub feature: String,
    pub timestamp: DateTime<Utc>,
}

/// One counted, plan-limited action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEvent {
    pub id: Uuid,
    pub user_id: String,
    pub feature: Feature,
    pub timestamp: DateTime<Utc>,
}

impl FeatureEvent {
    pub fn new(user_id: &str, feature: Feature, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            feature,
            timestamp,
        }
    }
}

/// Append-only ledger of AI usage
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn insert_ai_usage(&self, record: &AiUsageRecord) -> Result<(), Error>;

    /// Total `cost_usd` of the user's records with `timestamp >= since`
    async fn sum_cost_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<f64, Error>;

    /// The user's records with `timestamp >= since`, oldest first
    async fn list_ai_usage_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AiUsageRecord>, Error>;

    async fn health(&self) -> Result<(), Error>;
}

/// Plan assignments and feature event counts
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn get_plan_tier(&self, user_id: &str) -> Result<Option<PlanTier>, Error>;

    async fn set_plan_tier(&self, user_id: &str, tier: PlanTier) -> Result<(), Error>;

    async fn insert_feature_event(&self, event: &FeatureEvent) -> Result<(), Error>;

    /// Number of the user's events of `feature`, since `since` or all time
    async fn count_feature_events(
        &self,
        user_id: &str,
        feature: Feature,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, Error>;
}

/// The `[storage]` section of the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum StorageConfig {
    #[default]
    Memory,
    Sqlite {
        /// e.g. `sqlite://aureon.db` or `sqlite::memory:`
        url: String,
    },
}

/// Both storage roles, served by one backend
#[derive(Clone)]
pub struct StorageBackend {
    pub ledger: Arc<dyn UsageLedger>,
    pub store: Arc<dyn UsageStore>,
    pub kind: &'static str,
}

pub async fn setup_storage(config: &StorageConfig) -> Result<StorageBackend, Error> {
    match config {
        StorageConfig::Memory => {
            let storage = Arc::new(MemoryStorage::default());
            tracing::warn!(
                "Using in-memory storage: usage records and plan assignments are lost on restart"
            );
            Ok(StorageBackend {
                ledger: storage.clone(),
                store: storage,
                kind: "memory",
            })
        }
        StorageConfig::Sqlite { url } => {
            let storage = Arc::new(SqliteStorage::connect(url).await?);
            tracing::info!("Connected to SQLite storage at `{url}`");
            Ok(StorageBackend {
                ledger: storage.clone(),
                store: storage,
                kind: "sqlite",
            })
        }
    }
}
