use axum::debug_handler;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::gateway_util::{AppState, AppStateData};

pub const AUREON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Liveness: the process is up and serving
pub async fn status_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": AUREON_VERSION }))
}

/// Readiness: the storage backend answers
#[debug_handler(state = AppStateData)]
pub async fn health_handler(State(app_state): AppState) -> Response {
    let kind = app_state.storage.kind;
    match app_state.storage.ledger.health().await {
        Ok(()) => Json(json!({ "gateway": "ok", "storage": kind })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "gateway": "ok", "storage": kind, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::get_unit_test_app_state_data;

    #[tokio::test]
    async fn test_status_handler() {
        let Json(body) = status_handler().await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], AUREON_VERSION);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let healthy = get_unit_test_app_state_data(Config::default(), true);
        let response = health_handler(State(healthy)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let unhealthy = get_unit_test_app_state_data(Config::default(), false);
        let response = health_handler(State(unhealthy)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
