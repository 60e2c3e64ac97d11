use axum::debug_handler;
use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::error::Error;
use crate::gateway_util::{AppState, AppStateData, StructuredJson};
use crate::usage_limit::{parse_plan_tier, Capability, PlanLimits, PlanTier};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPlanParams {
    /// Case-insensitive tier name; `TEAM` is accepted for `AGENCY`
    pub tier: String,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub user_id: String,
    pub tier: PlanTier,
    pub limits: PlanLimits,
    pub capabilities: Vec<Capability>,
}

impl PlanResponse {
    fn new(app_state: &AppStateData, user_id: String, tier: PlanTier) -> Self {
        Self {
            user_id,
            tier,
            limits: app_state.usage_limiter.plans().get(tier),
            capabilities: Capability::iter()
                .filter(|capability| tier.can_access(*capability))
                .collect(),
        }
    }
}

#[debug_handler(state = AppStateData)]
pub async fn get_plan_handler(
    State(app_state): AppState,
    Path(user_id): Path<String>,
) -> Result<Json<PlanResponse>, Error> {
    let tier = app_state.usage_limiter.get_tier(&user_id).await?;
    Ok(Json(PlanResponse::new(&app_state, user_id, tier)))
}

#[debug_handler(state = AppStateData)]
pub async fn set_plan_handler(
    State(app_state): AppState,
    Path(user_id): Path<String>,
    StructuredJson(params): StructuredJson<SetPlanParams>,
) -> Result<Json<PlanResponse>, Error> {
    let tier = parse_plan_tier(&params.tier)?;
    app_state.usage_limiter.set_plan(&user_id, tier).await?;
    Ok(Json(PlanResponse::new(&app_state, user_id, tier)))
}
