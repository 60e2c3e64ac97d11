//! Logging and metrics setup for the gateway process.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::error::{Error, ErrorDetails};

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

const DEFAULT_LOG_FILTER: &str = "info";
const DEBUG_LOG_FILTER: &str = "info,aureon_internal=debug,gateway=debug";

/// Allows raising the log level once the config file has been read
pub struct DelayedDebugLogs {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl DelayedDebugLogs {
    /// Switch our crates to `debug`. An explicit `RUST_LOG` always wins.
    pub fn enable_debug(&self) -> Result<(), Error> {
        if std::env::var("RUST_LOG").is_ok() {
            tracing::info!("`RUST_LOG` is set, ignoring `gateway.debug`");
            return Ok(());
        }
        self.handle
            .modify(|filter| *filter = EnvFilter::new(DEBUG_LOG_FILTER))
            .map_err(|e| {
                Error::new(ErrorDetails::Observability {
                    message: format!("Failed to enable debug logs: {e}"),
                })
            })
    }
}

pub struct DelayedLogConfig {
    pub delayed_debug_logs: DelayedDebugLogs,
}

/// Install the global `tracing` subscriber.
///
/// The level comes from `RUST_LOG` and defaults to `info`.
pub async fn setup_observability(log_format: LogFormat) -> Result<DelayedLogConfig, Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter, handle) = reload::Layer::new(filter);

    let (json_layer, pretty_layer) = match log_format {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Pretty => (None, Some(fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| {
            Error::new(ErrorDetails::Observability {
                message: format!("Failed to initialize tracing subscriber: {e}"),
            })
        })?;

    Ok(DelayedLogConfig {
        delayed_debug_logs: DelayedDebugLogs { handle },
    })
}

/// Install the global Prometheus recorder. Rendered by the `/metrics` route.
pub fn setup_metrics() -> Result<PrometheusHandle, Error> {
    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        Error::new(ErrorDetails::Observability {
            message: format!("Failed to install Prometheus exporter: {e}"),
        })
    })?;

    metrics::describe_counter!("rate_limit_checks", "Rate limit checks, by endpoint class");
    metrics::describe_counter!(
        "rate_limit_exceeded",
        "Requests rejected by the rate limiter, by endpoint class"
    );
    metrics::describe_counter!("ai_usage_tracked", "AI calls written to the ledger, by model");
    metrics::describe_counter!(
        "ai_usage_tracking_failures",
        "AI calls that could not be written to the ledger"
    );
    metrics::describe_counter!("budget_checks", "Monthly budget checks, by result");
    metrics::describe_counter!("usage_checks", "Plan quota checks, by feature");
    metrics::describe_counter!(
        "usage_quota_denied",
        "Feature events rejected for an exhausted quota, by feature"
    );

    Ok(handle)
}
