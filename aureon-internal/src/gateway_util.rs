use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{rejection::JsonRejection, FromRequest, Json, Request};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put, MethodRouter};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot::Sender;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::{instrument, Level};

use crate::config::Config;
use crate::cost::CostGovernor;
use crate::endpoints;
use crate::error::{Error, ErrorDetails};
use crate::rate_limit::{
    rate_limit_middleware, EndpointClass, FixedWindowRateLimiter, RateLimitLayerState,
    RateLimiterStore,
};
use crate::storage::{setup_storage, StorageBackend};
use crate::usage_limit::{PlanLimitsTable, UsageLimiter};

/// State for the API
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub rate_limiter: Arc<FixedWindowRateLimiter>,
    pub rate_limit_store: Arc<RateLimiterStore>,
    pub cost_governor: Arc<CostGovernor>,
    pub usage_limiter: Arc<UsageLimiter>,
    pub storage: StorageBackend,
}
pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    /// Connect storage and start the rate limit sweeper
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let storage = setup_storage(&config.storage).await?;
        let state = Self::new_with_storage(config, storage);

        if state.rate_limit_store.is_enabled() {
            let every = Duration::from_millis(state.rate_limit_store.sweep_interval_ms());
            state.rate_limiter.start_sweeper(every).await;
            tracing::info!(
                "Started rate limit sweeper (every {}ms)",
                every.as_millis()
            );
        } else {
            tracing::info!("Rate limiting is disabled");
        }

        Ok(state)
    }

    pub fn new_with_storage(config: Arc<Config>, storage: StorageBackend) -> Self {
        let rate_limit_store = Arc::new(RateLimiterStore::new(config.rate_limits.clone()));
        let cost_governor = Arc::new(CostGovernor::new(
            storage.ledger.clone(),
            config.cost_governor.clone(),
        ));
        let usage_limiter = Arc::new(UsageLimiter::new(
            storage.store.clone(),
            PlanLimitsTable::new(&config.plans),
            config.usage_limits.clone(),
        ));

        Self {
            config,
            rate_limiter: Arc::new(FixedWindowRateLimiter::new()),
            rate_limit_store,
            cost_governor,
            usage_limiter,
            storage,
        }
    }

    pub fn rate_limit_layer(&self, class: EndpointClass) -> RateLimitLayerState {
        RateLimitLayerState {
            limiter: self.rate_limiter.clone(),
            store: self.rate_limit_store.clone(),
            class,
        }
    }
}

/// Wrap `method_router` in the rate limit policy of `class`
fn limited(
    method_router: MethodRouter<AppStateData>,
    app_state: &AppStateData,
    class: EndpointClass,
) -> MethodRouter<AppStateData> {
    method_router.route_layer(from_fn_with_state(
        app_state.rate_limit_layer(class),
        rate_limit_middleware,
    ))
}

/// All gateway routes. `/metrics` is only served when a Prometheus handle is given.
pub fn build_router(app_state: AppStateData, metrics_handle: Option<PrometheusHandle>) -> Router {
    let state = &app_state;

    let governance_routes = Router::new()
        .route(
            "/v1/rate_limit/check",
            post(endpoints::rate_limit::check_handler),
        )
        .route(
            "/v1/rate_limit/policies",
            limited(
                get(endpoints::rate_limit::list_policies_handler),
                state,
                EndpointClass::AdminRead,
            ),
        )
        .route(
            "/v1/rate_limit/policies/{class}",
            limited(
                put(endpoints::rate_limit::update_policy_handler),
                state,
                EndpointClass::AdminWrite,
            ),
        )
        .route(
            "/v1/ai_usage",
            limited(
                post(endpoints::budget::track_usage_handler),
                state,
                EndpointClass::ApiWrite,
            ),
        )
        .route(
            "/v1/budget/{user_id}",
            limited(
                get(endpoints::budget::check_budget_handler),
                state,
                EndpointClass::ApiRead,
            ),
        )
        .route(
            "/v1/budget/{user_id}/stats",
            limited(
                get(endpoints::budget::budget_stats_handler),
                state,
                EndpointClass::ApiRead,
            ),
        )
        .route(
            "/v1/budget/{user_id}/records",
            limited(
                get(endpoints::budget::list_usage_handler),
                state,
                EndpointClass::ApiRead,
            ),
        )
        .route(
            "/v1/usage/{user_id}",
            limited(
                get(endpoints::usage::usage_snapshot_handler),
                state,
                EndpointClass::ApiRead,
            ),
        )
        .route(
            "/v1/usage/{user_id}/events",
            limited(
                post(endpoints::usage::record_event_handler),
                state,
                EndpointClass::ApiWrite,
            ),
        )
        .route(
            "/v1/usage/{user_id}/{feature}",
            limited(
                get(endpoints::usage::check_usage_handler),
                state,
                EndpointClass::ApiRead,
            ),
        )
        .route(
            "/v1/plans/{user_id}",
            limited(
                get(endpoints::plans::get_plan_handler),
                state,
                EndpointClass::AdminRead,
            )
            .merge(limited(
                put(endpoints::plans::set_plan_handler),
                state,
                EndpointClass::AdminWrite,
            )),
        );

    let mut public_routes = Router::new()
        .route("/status", get(endpoints::status::status_handler))
        .route("/health", get(endpoints::status::health_handler));
    if let Some(metrics_handle) = metrics_handle {
        public_routes = public_routes.route(
            "/metrics",
            get(move || std::future::ready(metrics_handle.render())),
        );
    }

    Router::new()
        .merge(governance_routes)
        .merge(public_routes)
        .fallback(endpoints::fallback::handle_404)
        // Failed requests are logged at DEBUG, since `Error` already logs itself
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)))
        .with_state(app_state)
}

/// Custom Axum extractor that validates the JSON body and deserializes it into a custom type
///
/// When this extractor is present, we don't check if the `Content-Type` header is `application/json`,
/// and instead simply assume that the request body is a JSON object.
pub struct StructuredJson<T>(pub T);

impl<S, T> FromRequest<S> for StructuredJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: Send + Sync + DeserializeOwned,
{
    type Rejection = Error;

    #[instrument(skip_all, level = "trace", name = "StructuredJson::from_request")]
    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = bytes::Bytes::from_request(req, state).await.map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: format!("{e} ({})", e.status()),
            })
        })?;

        let value = Json::<serde_json::Value>::from_bytes(&bytes)
            .map_err(|e| {
                Error::new(ErrorDetails::JsonRequest {
                    message: format!("{e} ({})", e.status()),
                })
            })?
            .0;

        // `serde_path_to_error` reports which field failed to deserialize
        let deserialized: T = serde_path_to_error::deserialize(&value).map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: e.to_string(),
            })
        })?;

        Ok(StructuredJson(deserialized))
    }
}

pub struct ShutdownHandle {
    #[expect(dead_code)]
    sender: Sender<()>,
}

/// Starts a gateway on an unused local port.
///
/// Returns the address the gateway is listening on and a `ShutdownHandle`
/// which shuts the gateway down when dropped.
pub async fn start_gateway(config: Config) -> Result<(SocketAddr, ShutdownHandle), Error> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Failed to bind to a port: {e}"),
            })
        })?;
    let bind_addr = listener.local_addr().map_err(|e| {
        Error::new(ErrorDetails::InternalError {
            message: format!("Failed to get local address: {e}"),
        })
    })?;

    config.verify()?;
    let app_state = AppStateData::new(Arc::new(config)).await?;
    let router = build_router(app_state, None);

    let (sender, recv) = tokio::sync::oneshot::channel::<()>();
    let shutdown_fut = async move {
        let _ = recv.await;
    };

    tokio::spawn(
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_fut)
            .into_future(),
    );
    Ok((bind_addr, ShutdownHandle { sender }))
}
