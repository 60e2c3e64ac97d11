use axum::debug_handler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::cost::{BudgetCheck, BudgetStats};
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::{AppState, AppStateData, StructuredJson};
use crate::storage::AiUsageRecord;

/// One AI call to be priced and recorded
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackUsageParams {
    pub user_id: String,
    pub model: String,
    pub tokens_input: u64,
    #[serde(default)]
    pub tokens_output: u64,
    pub feature: String,
}

/// Record AI usage. Always accepted: tracking failures are logged, never surfaced.
#[debug_handler(state = AppStateData)]
pub async fn track_usage_handler(
    State(app_state): AppState,
    StructuredJson(params): StructuredJson<TrackUsageParams>,
) -> Result<StatusCode, Error> {
    if params.user_id.trim().is_empty() {
        return Err(Error::new(ErrorDetails::InvalidRequest {
            message: "`user_id` must not be empty".to_string(),
        }));
    }

    app_state
        .cost_governor
        .track_usage(
            &params.user_id,
            &params.model,
            params.tokens_input,
            params.tokens_output,
            &params.feature,
        )
        .await;
    Ok(StatusCode::ACCEPTED)
}

#[debug_handler(state = AppStateData)]
pub async fn check_budget_handler(
    State(app_state): AppState,
    Path(user_id): Path<String>,
) -> Json<BudgetCheck> {
    Json(app_state.cost_governor.check_budget(&user_id).await)
}

#[debug_handler(state = AppStateData)]
pub async fn budget_stats_handler(
    State(app_state): AppState,
    Path(user_id): Path<String>,
) -> Result<Json<BudgetStats>, Error> {
    Ok(Json(app_state.cost_governor.get_budget_stats(&user_id).await?))
}

#[derive(Debug, Serialize)]
pub struct ListUsageResponse {
    pub user_id: String,
    pub records: Vec<AiUsageRecord>,
}

/// Ledger rows of the current month
#[debug_handler(state = AppStateData)]
pub async fn list_usage_handler(
    State(app_state): AppState,
    Path(user_id): Path<String>,
) -> Result<Json<ListUsageResponse>, Error> {
    let records = app_state.cost_governor.list_usage(&user_id).await?;
    Ok(Json(ListUsageResponse { user_id, records }))
}
