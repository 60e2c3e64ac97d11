use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, ErrorDetails};
use crate::storage::{AiUsageRecord, FeatureEvent, UsageLedger, UsageStore};
use crate::usage_limit::{Feature, PlanTier};

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS ai_usage_records (
        id TEXT NOT NULL PRIMARY KEY,
        user_id TEXT NOT NULL,
        model TEXT NOT NULL,
        tokens_input INTEGER NOT NULL,
        tokens_output INTEGER NOT NULL,
        cost_usd REAL NOT NULL,
        feature TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_ai_usage_user_time ON ai_usage_records(user_id, timestamp_ms)",
    "CREATE TABLE IF NOT EXISTS feature_events (
        id TEXT NOT NULL PRIMARY KEY,
        user_id TEXT NOT NULL,
        feature TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_feature_events_user ON feature_events(user_id, feature, timestamp_ms)",
    "CREATE TABLE IF NOT EXISTS plan_assignments (
        user_id TEXT NOT NULL PRIMARY KEY,
        tier TEXT NOT NULL,
        updated_at_ms INTEGER NOT NULL
    )",
];

/// Relational storage on SQLite
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `database_url` and run migrations
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Invalid SQLite URL `{database_url}`: {e}"),
                })
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to an in-memory database sees its own database
        let max_connections: u32 = if database_url.contains(":memory:") {
            1
        } else {
            10
        };

        let pool = sqlx::pool::PoolOptions::<Sqlite>::new()
            .max_connections(max_connections)
            .connect_with(connect_opts)
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Storage {
                    message: format!("Failed to connect to SQLite: {e}"),
                })
            })?;

        run_migrations(&pool).await?;
        Ok(Self { pool })
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), Error> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            Error::new(ErrorDetails::StorageMigration {
                statement: statement
                    .split_whitespace()
                    .take(6)
                    .collect::<Vec<_>>()
                    .join(" "),
                message: e.to_string(),
            })
        })?;
    }
    Ok(())
}

fn storage_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::new(ErrorDetails::Storage {
        message: format!("{context}: {e}"),
    })
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| storage_error("Invalid stored timestamp", millis))
}

fn record_from_row(row: &SqliteRow) -> Result<AiUsageRecord, Error> {
    let id: String = row
        .try_get("id")
        .map_err(|e| storage_error("Failed to read usage record", e))?;
    let read_int = |column: &str| -> Result<i64, Error> {
        row.try_get::<i64, _>(column)
            .map_err(|e| storage_error("Failed to read usage record", e))
    };
    let read_text = |column: &str| -> Result<String, Error> {
        row.try_get::<String, _>(column)
            .map_err(|e| storage_error("Failed to read usage record", e))
    };

    Ok(AiUsageRecord {
        id: Uuid::parse_str(&id).map_err(|e| storage_error("Invalid stored record id", e))?,
        user_id: read_text("user_id")?,
        model: read_text("model")?,
        tokens_input: read_int("tokens_input")?.max(0) as u64,
        tokens_output: read_int("tokens_output")?.max(0) as u64,
        cost_usd: row
            .try_get("cost_usd")
            .map_err(|e| storage_error("Failed to read usage record", e))?,
        feature: read_text("feature")?,
        timestamp: from_millis(read_int("timestamp_ms")?)?,
    })
}

#[async_trait]
impl UsageLedger for SqliteStorage {
    async fn insert_ai_usage(&self, record: &AiUsageRecord) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO ai_usage_records (
                id, user_id, model, tokens_input, tokens_output, cost_usd, feature, timestamp_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(record.id.to_string())
        .bind(&record.user_id)
        .bind(&record.model)
        .bind(to_sql_int(record.tokens_input))
        .bind(to_sql_int(record.tokens_output))
        .bind(record.cost_usd)
        .bind(&record.feature)
        .bind(record.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to insert usage record", e))?;
        Ok(())
    }

    async fn sum_cost_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<f64, Error> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(cost_usd), 0.0) AS total
             FROM ai_usage_records
             WHERE user_id = ?1 AND timestamp_ms >= ?2",
        )
        .bind(user_id)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to sum usage cost", e))?;

        row.try_get::<f64, _>("total")
            .map_err(|e| storage_error("Failed to read usage cost", e))
    }

    async fn list_ai_usage_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AiUsageRecord>, Error> {
        let rows = sqlx::query(
            "SELECT id, user_id, model, tokens_input, tokens_output, cost_usd, feature, timestamp_ms
             FROM ai_usage_records
             WHERE user_id = ?1 AND timestamp_ms >= ?2
             ORDER BY timestamp_ms ASC",
        )
        .bind(user_id)
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to list usage records", e))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn health(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("SQLite health check failed", e))?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for SqliteStorage {
    async fn get_plan_tier(&self, user_id: &str) -> Result<Option<PlanTier>, Error> {
        let row = sqlx::query("SELECT tier FROM plan_assignments WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to read plan assignment", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let tier: String = row
            .try_get("tier")
            .map_err(|e| storage_error("Failed to read plan assignment", e))?;
        PlanTier::from_str(&tier)
            .map(Some)
            .map_err(|e| storage_error(&format!("Invalid stored plan tier `{tier}`"), e))
    }

    async fn set_plan_tier(&self, user_id: &str, tier: PlanTier) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO plan_assignments (user_id, tier, updated_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET tier = excluded.tier, updated_at_ms = excluded.updated_at_ms",
        )
        .bind(user_id)
        .bind(tier.as_ref())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to write plan assignment", e))?;
        Ok(())
    }

    async fn insert_feature_event(&self, event: &FeatureEvent) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO feature_events (id, user_id, feature, timestamp_ms) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(event.id.to_string())
        .bind(&event.user_id)
        .bind(event.feature.as_ref())
        .bind(event.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to insert feature event", e))?;
        Ok(())
    }

    async fn count_feature_events(
        &self,
        user_id: &str,
        feature: Feature,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, Error> {
        let since_ms = since.map(|since| since.timestamp_millis()).unwrap_or(i64::MIN);
        let row = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM feature_events
             WHERE user_id = ?1 AND feature = ?2 AND timestamp_ms >= ?3",
        )
        .bind(user_id)
        .bind(feature.as_ref())
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to count feature events", e))?;

        let count: i64 = row
            .try_get("count")
            .map_err(|e| storage_error("Failed to read feature event count", e))?;
        Ok(count.max(0) as u64)
    }
}
