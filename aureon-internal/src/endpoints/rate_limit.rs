use axum::debug_handler;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::calendar::now_ms;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::{AppState, AppStateData, StructuredJson};
use crate::rate_limit::{EndpointClass, RateLimitConfig};

const EXPLICIT_NAMESPACE: &str = "explicit";

/// Either a named endpoint class or an explicit window
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CheckPolicy {
    Class { class: String },
    Explicit { window_ms: u64, max_requests: u32 },
}

#[derive(Debug, Deserialize)]
pub struct CheckParams {
    pub identifier: String,
    #[serde(flatten)]
    pub policy: CheckPolicy,
}

fn parse_class(class: &str) -> Result<EndpointClass, Error> {
    class.parse().map_err(|_| {
        Error::new(ErrorDetails::UnknownRateLimitClass {
            class: class.to_string(),
        })
    })
}

fn validate_policy(window_ms: u64, max_requests: u32) -> Result<RateLimitConfig, Error> {
    if window_ms == 0 || max_requests == 0 {
        return Err(Error::new(ErrorDetails::InvalidRequest {
            message: "`window_ms` and `max_requests` must be greater than 0".to_string(),
        }));
    }
    Ok(RateLimitConfig::new(window_ms, max_requests))
}

/// Count one request for an identifier and report the outcome.
///
/// Class checks share counters with the gateway's own route limits. Explicit
/// windows count under their own `explicit:` namespace, so they never touch a
/// route counter. A denied check still answers 200: the caller decides what
/// to do with it.
#[debug_handler(state = AppStateData)]
pub async fn check_handler(
    State(app_state): AppState,
    StructuredJson(params): StructuredJson<CheckParams>,
) -> Result<Response, Error> {
    let (key, policy, label) = match params.policy {
        CheckPolicy::Class { class } => {
            let class = parse_class(&class)?;
            let policy = *app_state.rate_limit_store.get_policy(class);
            (format!("{class}:{}", params.identifier), policy, class.to_string())
        }
        CheckPolicy::Explicit {
            window_ms,
            max_requests,
        } => (
            format!("{EXPLICIT_NAMESPACE}:{}", params.identifier),
            validate_policy(window_ms, max_requests)?,
            EXPLICIT_NAMESPACE.to_string(),
        ),
    };

    let now = now_ms();
    let result = app_state.rate_limiter.check_at(&key, &policy, now);
    metrics::counter!("rate_limit_checks", "class" => label.clone()).increment(1);
    if !result.allowed {
        metrics::counter!("rate_limit_exceeded", "class" => label).increment(1);
    }

    let headers = result.to_decision(now).headers().to_header_map();
    Ok((headers, Json(result)).into_response())
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PolicyEntry {
    pub class: EndpointClass,
    #[serde(flatten)]
    pub policy: RateLimitConfig,
}

#[derive(Debug, Serialize)]
pub struct PoliciesResponse {
    pub enabled: bool,
    pub sweep_interval_ms: u64,
    pub tracked_identifiers: usize,
    pub policies: Vec<PolicyEntry>,
}

#[debug_handler(state = AppStateData)]
pub async fn list_policies_handler(State(app_state): AppState) -> Json<PoliciesResponse> {
    let store = &app_state.rate_limit_store;
    Json(PoliciesResponse {
        enabled: store.is_enabled(),
        sweep_interval_ms: store.sweep_interval_ms(),
        tracked_identifiers: app_state.rate_limiter.len(),
        policies: store
            .list_policies()
            .into_iter()
            .map(|(class, policy)| PolicyEntry { class, policy })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePolicyParams {
    pub window_ms: u64,
    pub max_requests: u32,
}

/// Replace the policy of one class until the next restart
#[debug_handler(state = AppStateData)]
pub async fn update_policy_handler(
    State(app_state): AppState,
    Path(class): Path<String>,
    StructuredJson(params): StructuredJson<UpdatePolicyParams>,
) -> Result<Json<PolicyEntry>, Error> {
    let class = parse_class(&class)?;
    let policy = validate_policy(params.window_ms, params.max_requests)?;
    app_state.rate_limit_store.update_policy(class, policy);
    tracing::info!(
        class = %class,
        window_ms = policy.window_ms,
        max_requests = policy.max_requests,
        "Rate limit policy updated"
    );
    Ok(Json(PolicyEntry { class, policy }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rate_limit::{enforce_rate_limit, RateLimitResult};
    use crate::testing::get_unit_test_app_state_data;
    use axum::http::StatusCode;

    fn parse_params(value: serde_json::Value) -> CheckParams {
        serde_json::from_value(value).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_check_params_shapes() {
        let params = parse_params(serde_json::json!({"identifier": "a", "class": "auth_login"}));
        assert!(matches!(params.policy, CheckPolicy::Class { ref class } if class == "auth_login"));

        let params = parse_params(
            serde_json::json!({"identifier": "a", "window_ms": 1000, "max_requests": 2}),
        );
        assert!(matches!(
            params.policy,
            CheckPolicy::Explicit {
                window_ms: 1000,
                max_requests: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_explicit_check_counts_down() {
        let app_state = get_unit_test_app_state_data(Config::default(), true);
        let check = |app_state: AppStateData| {
            check_handler(
                State(app_state),
                StructuredJson(parse_params(serde_json::json!({
                    "identifier": "ip:1.2.3.4",
                    "window_ms": 60000,
                    "max_requests": 2
                }))),
            )
        };

        let first = check(app_state.clone()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["X-RateLimit-Remaining"], "1");
        let first = body_json(first).await;
        assert_eq!(first["allowed"], true);

        check(app_state.clone()).await.unwrap();
        let third = check(app_state).await.unwrap();
        assert!(third.headers().contains_key("Retry-After"));
        let third = body_json(third).await;
        assert_eq!(third["allowed"], false);
        assert_eq!(third["remaining"], 0);
    }

    #[tokio::test]
    async fn test_class_check_uses_store_policy() {
        let app_state = get_unit_test_app_state_data(Config::default(), true);
        let response = check_handler(
            State(app_state.clone()),
            StructuredJson(parse_params(
                serde_json::json!({"identifier": "u", "class": "auth_login"}),
            )),
        )
        .await
        .unwrap();
        let result = body_json(response).await;
        assert_eq!(result["limit"], 5);
        assert_eq!(result["remaining"], 4);

        // Class checks are namespaced the same way as route limits
        assert_eq!(
            app_state
                .rate_limiter
                .check("auth_login:u", &RateLimitConfig::new(900_000, 5)),
            RateLimitResult {
                allowed: true,
                limit: 5,
                remaining: 3,
                reset_time: result["reset_time"].as_u64().unwrap(),
            }
        );
    }

    #[tokio::test]
    async fn test_explicit_check_cannot_spend_route_counters() {
        let app_state = get_unit_test_app_state_data(Config::default(), true);
        app_state
            .rate_limit_store
            .update_policy(EndpointClass::ApiWrite, RateLimitConfig::new(60_000, 1));

        for _ in 0..5 {
            check_handler(
                State(app_state.clone()),
                StructuredJson(parse_params(serde_json::json!({
                    "identifier": "api_write:victim",
                    "window_ms": 60000,
                    "max_requests": 1000
                }))),
            )
            .await
            .unwrap();
        }

        let headers = enforce_rate_limit(
            &app_state.rate_limiter,
            &app_state.rate_limit_store,
            EndpointClass::ApiWrite,
            "victim",
        )
        .unwrap();
        assert_eq!(headers.remaining, 0);
    }

    #[tokio::test]
    async fn test_invalid_checks() {
        let app_state = get_unit_test_app_state_data(Config::default(), true);
        let err = check_handler(
            State(app_state.clone()),
            StructuredJson(parse_params(
                serde_json::json!({"identifier": "u", "class": "auth-login"}),
            )),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = check_handler(
            State(app_state),
            StructuredJson(parse_params(
                serde_json::json!({"identifier": "u", "window_ms": 0, "max_requests": 1}),
            )),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_and_list_policies() {
        let app_state = get_unit_test_app_state_data(Config::default(), true);

        let Json(entry) = update_policy_handler(
            State(app_state.clone()),
            Path("api_read".to_string()),
            StructuredJson(UpdatePolicyParams {
                window_ms: 1000,
                max_requests: 7,
            }),
        )
        .await
        .unwrap();
        assert_eq!(entry.policy, RateLimitConfig::new(1000, 7));

        let Json(listing) = list_policies_handler(State(app_state)).await;
        assert!(listing.enabled);
        assert_eq!(listing.policies.len(), 9);
        assert!(listing.policies.contains(&PolicyEntry {
            class: EndpointClass::ApiRead,
            policy: RateLimitConfig::new(1000, 7),
        }));
    }
}
