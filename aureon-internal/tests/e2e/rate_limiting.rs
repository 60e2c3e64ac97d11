use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};

use crate::common::start_test_gateway;

const TIGHT_API_READ: &str = r#"
[rate_limits.policies.api_read]
window_ms = 60000
max_requests = 5
"#;

#[tokio::test]
async fn test_route_limit_counts_down_then_rejects() {
    let gateway = start_test_gateway(TIGHT_API_READ).await;

    for expected_remaining in ["4", "3", "2", "1", "0"] {
        let response = gateway
            .client
            .get(gateway.url("/v1/budget/user_1"))
            .header("x-user-id", "user_1")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            expected_remaining
        );
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    let response = gateway
        .client
        .get(gateway.url("/v1/budget/user_1"))
        .header("x-user-id", "user_1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["class"], "api_read");
}

#[tokio::test]
async fn test_clients_are_counted_separately() {
    let gateway = start_test_gateway(TIGHT_API_READ).await;

    for _ in 0..5 {
        gateway
            .client
            .get(gateway.url("/v1/usage/user_1"))
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .send()
            .await
            .unwrap();
    }

    let blocked = gateway
        .client
        .get(gateway.url("/v1/usage/user_1"))
        .header("x-forwarded-for", "203.0.113.7")
        .send()
        .await
        .unwrap();
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

    let other_client = gateway
        .client
        .get(gateway.url("/v1/usage/user_1"))
        .header("x-forwarded-for", "198.51.100.2")
        .send()
        .await
        .unwrap();
    assert_eq!(other_client.status(), StatusCode::OK);

    // A different endpoint class has its own counter
    let write = gateway
        .client
        .post(gateway.url("/v1/ai_usage"))
        .header("x-forwarded-for", "203.0.113.7")
        .json(&json!({
            "user_id": "user_1",
            "model": "gpt-4o",
            "tokens_input": 10,
            "feature": "insights"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(write.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_disabled_rate_limiting_adds_no_headers() {
    let gateway = start_test_gateway(
        r#"
        [rate_limits]
        enabled = false

        [rate_limits.policies.api_read]
        window_ms = 60000
        max_requests = 1
        "#,
    )
    .await;

    for _ in 0..3 {
        let response = gateway
            .client
            .get(gateway.url("/v1/budget/user_1"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}

#[tokio::test]
async fn test_check_endpoint_window_resets() {
    let gateway = start_test_gateway("").await;
    let check = || {
        gateway
            .client
            .post(gateway.url("/v1/rate_limit/check"))
            .json(&json!({"identifier": "login:alice", "window_ms": 1000, "max_requests": 2}))
            .send()
    };

    let first: Value = check().await.unwrap().json().await.unwrap();
    assert_eq!(first["allowed"], true);
    assert_eq!(first["remaining"], 1);

    let second: Value = check().await.unwrap().json().await.unwrap();
    assert_eq!(second["remaining"], 0);

    let third = check().await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
    assert!(third.headers().contains_key("retry-after"));
    let third: Value = third.json().await.unwrap();
    assert_eq!(third["allowed"], false);
    assert_eq!(third["reset_time"], first["reset_time"]);

    sleep(Duration::from_millis(1200)).await;

    let after_reset: Value = check().await.unwrap().json().await.unwrap();
    assert_eq!(after_reset["allowed"], true);
    assert_eq!(after_reset["remaining"], 1);
}

#[tokio::test]
async fn test_policy_update_takes_effect() {
    let gateway = start_test_gateway("").await;

    let response = gateway
        .client
        .put(gateway.url("/v1/rate_limit/policies/api_read"))
        .json(&json!({"window_ms": 60000, "max_requests": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let first = gateway
        .client
        .get(gateway.url("/v1/plans/user_1"))
        .send()
        .await
        .unwrap();
    // `/v1/plans` is an admin route and unaffected
    assert_eq!(first.headers()["x-ratelimit-limit"], "100");

    let first = gateway
        .client
        .get(gateway.url("/v1/budget/user_1"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = gateway
        .client
        .get(gateway.url("/v1/budget/user_1"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let listing: Value = gateway
        .client
        .get(gateway.url("/v1/rate_limit/policies"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let api_read = listing["policies"]
        .as_array()
        .unwrap()
        .iter()
        .find(|policy| policy["class"] == "api_read")
        .unwrap();
    assert_eq!(api_read["max_requests"], 1);
}
