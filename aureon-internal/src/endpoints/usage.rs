use axum::debug_handler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::gateway_util::{AppState, AppStateData, StructuredJson};
use crate::rate_limit::{enforce_rate_limit, EndpointClass};
use crate::storage::FeatureEvent;
use crate::usage_limit::{parse_feature, Feature, UsageCheck, UsageSnapshot};

#[debug_handler(state = AppStateData)]
pub async fn usage_snapshot_handler(
    State(app_state): AppState,
    Path(user_id): Path<String>,
) -> Result<Json<UsageSnapshot>, Error> {
    Ok(Json(app_state.usage_limiter.usage_snapshot(&user_id).await?))
}

#[debug_handler(state = AppStateData)]
pub async fn check_usage_handler(
    State(app_state): AppState,
    Path((user_id, feature)): Path<(String, String)>,
) -> Result<Json<UsageCheck>, Error> {
    let feature = parse_feature(&feature)?;
    Ok(Json(
        app_state.usage_limiter.check_usage(&user_id, feature).await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordEventParams {
    pub feature: Feature,
}

#[derive(Debug, Serialize)]
pub struct RecordEventResponse {
    pub event: FeatureEvent,
    /// Quota state including the event just recorded
    pub usage: UsageCheck,
}

/// Record one use of a plan-limited feature, or answer 402 when the quota is spent.
///
/// Strategy generation is additionally throttled per user, once the quota
/// check has passed.
#[debug_handler(state = AppStateData)]
pub async fn record_event_handler(
    State(app_state): AppState,
    Path(user_id): Path<String>,
    StructuredJson(params): StructuredJson<RecordEventParams>,
) -> Response {
    if params.feature == Feature::Strategies && app_state.rate_limit_store.is_enabled() {
        // An exhausted quota answers 402 below without spending a generation slot
        let has_quota = match app_state
            .usage_limiter
            .check_usage(&user_id, params.feature)
            .await
        {
            Ok(check) => check.allowed,
            Err(e) => return e.into_response(),
        };
        if has_quota {
            if let Err(rejection) = enforce_rate_limit(
                &app_state.rate_limiter,
                &app_state.rate_limit_store,
                EndpointClass::StrategyGeneration,
                &user_id,
            ) {
                return rejection.into_response();
            }
        }
    }

    match app_state
        .usage_limiter
        .record_event_if_allowed(&user_id, params.feature)
        .await
    {
        Ok((usage, event)) => (
            StatusCode::CREATED,
            Json(RecordEventResponse { event, usage }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
