use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, warn};

use crate::calendar::now_ms;
use crate::rate_limit::{
    EndpointClass, FixedWindowRateLimiter, RateLimitDecision, RateLimitHeaders, RateLimiterStore,
};

pub const ANONYMOUS_IDENTIFIER: &str = "anonymous";

/// State attached to one group of routes sharing an endpoint class
#[derive(Clone)]
pub struct RateLimitLayerState {
    pub limiter: Arc<FixedWindowRateLimiter>,
    pub store: Arc<RateLimiterStore>,
    pub class: EndpointClass,
}

/// Fixed-window rate limiting for a route group.
///
/// Requests are counted per client identifier under the group's endpoint class.
/// Allowed responses carry `X-RateLimit-*` headers; denied requests get a 429.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitLayerState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitRejection> {
    if !state.store.is_enabled() {
        return Ok(next.run(request).await);
    }

    let identifier = extract_client_identifier(request.headers());
    let headers = enforce_rate_limit(&state.limiter, &state.store, state.class, &identifier)?;

    let mut response = next.run(request).await;
    response.headers_mut().extend(headers.to_header_map());
    Ok(response)
}

/// Count one request for `identifier` under `class` and map the result to headers or a rejection
pub fn enforce_rate_limit(
    limiter: &FixedWindowRateLimiter,
    store: &RateLimiterStore,
    class: EndpointClass,
    identifier: &str,
) -> Result<RateLimitHeaders, RateLimitRejection> {
    let policy = store.get_policy(class);
    let key = format!("{class}:{identifier}");
    let now = now_ms();
    let result = limiter.check_at(&key, &policy, now);

    metrics::counter!("rate_limit_checks", "class" => class.to_string()).increment(1);

    match result.to_decision(now) {
        RateLimitDecision::Allow(headers) => {
            debug!(
                class = %class,
                identifier,
                remaining = headers.remaining,
                "Rate limit check passed"
            );
            Ok(headers)
        }
        RateLimitDecision::Deny(headers) => {
            warn!(
                class = %class,
                identifier,
                retry_after = headers.retry_after,
                "Rate limit exceeded"
            );
            metrics::counter!("rate_limit_exceeded", "class" => class.to_string()).increment(1);
            Err(RateLimitRejection { class, headers })
        }
    }
}

/// The identifier a request is counted under.
///
/// Prefers the user id forwarded by the upstream authenticator, then the client
/// address from proxy headers.
pub fn extract_client_identifier(headers: &HeaderMap) -> String {
    if let Some(user_id) = header_str(headers, "x-user-id") {
        return user_id.to_string();
    }

    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        return real_ip.to_string();
    }

    ANONYMOUS_IDENTIFIER.to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// A request rejected by the rate limiter
#[derive(Debug)]
pub struct RateLimitRejection {
    pub class: EndpointClass,
    pub headers: RateLimitHeaders,
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": {
                    "message": "Too many requests. Please try again later.",
                    "type": "rate_limit_error",
                    "code": "rate_limit_exceeded",
                    "class": self.class,
                    "retry_after": self.headers.retry_after,
                }
            })),
        )
            .into_response();

        response.headers_mut().extend(self.headers.to_header_map());
        response
    }
}
