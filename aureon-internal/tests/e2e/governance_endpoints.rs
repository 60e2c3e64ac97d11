use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::common::{start_test_gateway, TestGateway};

/// `flat-5` costs $5 per unit, so `tokens_input` sets the spend directly
const FLAT_PRICED: &str = r#"
[cost_governor]
monthly_hard_limit_usd = 50.0

[cost_governor.models.flat-5]
type = "per_unit"
unit_cost = 5.0
"#;

async fn track(gateway: &TestGateway, user_id: &str, units: u64, feature: &str) {
    let response = gateway
        .client
        .post(gateway.url("/v1/ai_usage"))
        .json(&json!({
            "user_id": user_id,
            "model": "flat-5",
            "tokens_input": units,
            "feature": feature
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

async fn get_json(gateway: &TestGateway, path: &str) -> (StatusCode, Value) {
    let response = gateway.client.get(gateway.url(path)).send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn record_event(gateway: &TestGateway, user_id: &str, feature: &str) -> (StatusCode, Value) {
    let response = gateway
        .client
        .post(gateway.url(&format!("/v1/usage/{user_id}/events")))
        .json(&json!({ "feature": feature }))
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_budget_hard_limit() {
    let gateway = start_test_gateway(FLAT_PRICED).await;

    track(&gateway, "user_1", 2, "strategy").await;
    track(&gateway, "user_1", 3, "strategy").await;
    track(&gateway, "user_1", 4, "insights").await;

    let (status, check) = get_json(&gateway, "/v1/budget/user_1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["current_spend"], 45.0);
    assert_eq!(check["limit"], 50.0);
    assert_eq!(check["allowed"], true);
    assert!(check.get("degraded").is_none());

    track(&gateway, "user_1", 2, "insights").await;
    let (_, check) = get_json(&gateway, "/v1/budget/user_1").await;
    assert_eq!(check["current_spend"], 55.0);
    assert_eq!(check["allowed"], false);

    let (_, stats) = get_json(&gateway, "/v1/budget/user_1/stats").await;
    assert_eq!(stats["status"], "CRITICAL");
    assert_eq!(stats["remaining"], 0.0);
    assert_eq!(stats["by_feature"]["strategy"], 25.0);
    assert_eq!(stats["by_feature"]["insights"], 30.0);

    let (_, records) = get_json(&gateway, "/v1/budget/user_1/records").await;
    assert_eq!(records["records"].as_array().unwrap().len(), 4);

    // Other users are unaffected
    let (_, check) = get_json(&gateway, "/v1/budget/user_2").await;
    assert_eq!(check["current_spend"], 0.0);
    assert_eq!(check["allowed"], true);
}

#[tokio::test]
async fn test_track_usage_validation() {
    let gateway = start_test_gateway("").await;

    let response = gateway
        .client
        .post(gateway.url("/v1/ai_usage"))
        .json(&json!({"user_id": "user_1", "model": "gpt-4"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let response = gateway
        .client
        .post(gateway.url("/v1/ai_usage"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_free_quota_exhaustion() {
    let gateway = start_test_gateway("").await;

    for expected_remaining in [2, 1, 0] {
        let (status, body) = record_event(&gateway, "user_1", "saved_items").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["usage"]["remaining"], expected_remaining);
        assert_eq!(body["event"]["feature"], "saved_items");
    }

    let (status, body) = record_event(&gateway, "user_1", "saved_items").await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["type"], "insufficient_quota");

    let (_, check) = get_json(&gateway, "/v1/usage/user_1/saved_items").await;
    assert_eq!(check["tier"], "FREE");
    assert_eq!(check["limit"], 3);
    assert_eq!(check["current_usage"], 3);
    assert_eq!(check["remaining"], 0);
    assert_eq!(check["allowed"], false);
}

#[tokio::test]
async fn test_plan_upgrade_lifts_quota() {
    let gateway = start_test_gateway("").await;

    for _ in 0..3 {
        record_event(&gateway, "user_1", "saved_items").await;
    }

    let response = gateway
        .client
        .put(gateway.url("/v1/plans/user_1"))
        .json(&json!({"tier": "TEAM"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let plan: Value = response.json().await.unwrap();
    assert_eq!(plan["tier"], "AGENCY");
    assert_eq!(plan["limits"]["saved_items"], -1);
    assert_eq!(plan["limits"]["team_members"], 10);

    let (status, body) = record_event(&gateway, "user_1", "saved_items").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["usage"]["remaining"], -1);

    let (_, snapshot) = get_json(&gateway, "/v1/usage/user_1").await;
    assert_eq!(snapshot["tier"], "AGENCY");
    let usage = snapshot["usage"].as_array().unwrap();
    assert_eq!(usage.len(), 4);
    assert!(usage.iter().all(|check| check["limit"] == -1));

    let (_, plan) = get_json(&gateway, "/v1/plans/user_1").await;
    assert!(plan["capabilities"]
        .as_array()
        .unwrap()
        .contains(&json!("white_label")));
}

#[tokio::test]
async fn test_plan_limit_overrides() {
    let gateway = start_test_gateway(
        r#"
        [plans.FREE]
        strategies_per_month = 1
        exports_per_month = 5
        saved_items = 3
        daily_ai_insights = 10
        team_members = 1
        api_calls = 0
        white_label = false
        "#,
    )
    .await;

    let (status, _) = record_event(&gateway, "user_1", "strategies").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = record_event(&gateway, "user_1", "strategies").await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_unknown_inputs() {
    let gateway = start_test_gateway("").await;

    let (status, _) = get_json(&gateway, "/v1/usage/user_1/videos").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = gateway
        .client
        .put(gateway.url("/v1/plans/user_1"))
        .json(&json!({"tier": "PLATINUM"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, body) = get_json(&gateway, "/v1/nothing-here").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn test_status_and_health() {
    let gateway = start_test_gateway("").await;

    let (status, body) = get_json(&gateway, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get_json(&gateway, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_sqlite_storage_persists_across_gateways() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("aureon.db").display());
    let config = format!("[storage]\ntype = \"sqlite\"\nurl = \"{url}\"\n{FLAT_PRICED}");

    {
        let gateway = start_test_gateway(&config).await;
        track(&gateway, "user_1", 3, "strategy").await;
        let response = gateway
            .client
            .put(gateway.url("/v1/plans/user_1"))
            .json(&json!({"tier": "pro"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let gateway = start_test_gateway(&config).await;
    let (_, check) = get_json(&gateway, "/v1/budget/user_1").await;
    assert_eq!(check["current_spend"], 15.0);
    let (_, plan) = get_json(&gateway, "/v1/plans/user_1").await;
    assert_eq!(plan["tier"], "PRO");
    let (_, health) = get_json(&gateway, "/health").await;
    assert_eq!(health["storage"], "sqlite");
}
