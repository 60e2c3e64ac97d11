use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use std::fmt::Debug;

#[derive(Debug, PartialEq)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
// We box `ErrorDetails` per the `clippy::result_large_err` lint
pub struct Error(Box<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn get_owned_details(self) -> ErrorDetails {
        *self.0
    }

    pub fn log(&self) {
        self.0.log();
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    AppState {
        message: String,
    },
    Config {
        message: String,
    },
    InternalError {
        message: String,
    },
    InvalidRequest {
        message: String,
    },
    JsonRequest {
        message: String,
    },
    Observability {
        message: String,
    },
    QuotaExceeded {
        feature: String,
        limit: i64,
        current_usage: u64,
    },
    RouteNotFound {
        path: String,
        method: String,
    },
    Serialization {
        message: String,
    },
    Storage {
        message: String,
    },
    StorageMigration {
        statement: String,
        message: String,
    },
    UnknownFeature {
        feature: String,
    },
    UnknownPlanTier {
        tier: String,
    },
    UnknownRateLimitClass {
        class: String,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::AppState { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidRequest { .. } => tracing::Level::WARN,
            ErrorDetails::JsonRequest { .. } => tracing::Level::WARN,
            ErrorDetails::Observability { .. } => tracing::Level::ERROR,
            ErrorDetails::QuotaExceeded { .. } => tracing::Level::INFO,
            ErrorDetails::RouteNotFound { .. } => tracing::Level::WARN,
            ErrorDetails::Serialization { .. } => tracing::Level::ERROR,
            ErrorDetails::Storage { .. } => tracing::Level::ERROR,
            ErrorDetails::StorageMigration { .. } => tracing::Level::ERROR,
            ErrorDetails::UnknownFeature { .. } => tracing::Level::WARN,
            ErrorDetails::UnknownPlanTier { .. } => tracing::Level::WARN,
            ErrorDetails::UnknownRateLimitClass { .. } => tracing::Level::WARN,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AppState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::JsonRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::Observability { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::QuotaExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            ErrorDetails::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::StorageMigration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::UnknownFeature { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::UnknownPlanTier { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::UnknownRateLimitClass { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable error type included in response bodies
    fn error_type(&self) -> &'static str {
        match self {
            ErrorDetails::QuotaExceeded { .. } => "insufficient_quota",
            ErrorDetails::InvalidRequest { .. }
            | ErrorDetails::JsonRequest { .. }
            | ErrorDetails::UnknownFeature { .. }
            | ErrorDetails::UnknownPlanTier { .. }
            | ErrorDetails::UnknownRateLimitClass { .. } => "invalid_request_error",
            ErrorDetails::RouteNotFound { .. } => "not_found",
            ErrorDetails::AppState { .. }
            | ErrorDetails::Config { .. }
            | ErrorDetails::InternalError { .. }
            | ErrorDetails::Observability { .. }
            | ErrorDetails::Serialization { .. }
            | ErrorDetails::Storage { .. }
            | ErrorDetails::StorageMigration { .. } => "internal_server_error",
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }

    pub fn to_response_json(&self) -> (StatusCode, Value) {
        (
            self.status_code(),
            json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.error_type(),
                }
            }),
        )
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::AppState { message } => {
                write!(f, "Error initializing AppState: {message}")
            }
            ErrorDetails::Config { message } => {
                write!(f, "{message}")
            }
            ErrorDetails::InternalError { message } => {
                write!(f, "Internal error: {message}")
            }
            ErrorDetails::InvalidRequest { message } => {
                write!(f, "Invalid request: {message}")
            }
            ErrorDetails::JsonRequest { message } => {
                write!(f, "Error parsing JSON request body: {message}")
            }
            ErrorDetails::Observability { message } => {
                write!(f, "Error setting up observability: {message}")
            }
            ErrorDetails::QuotaExceeded {
                feature,
                limit,
                current_usage,
            } => {
                write!(
                    f,
                    "Plan limit reached for `{feature}`: {current_usage} of {limit} used. Upgrade your plan to continue."
                )
            }
            ErrorDetails::RouteNotFound { path, method } => {
                write!(f, "Route not found: {method} {path}")
            }
            ErrorDetails::Serialization { message } => {
                write!(f, "Serialization error: {message}")
            }
            ErrorDetails::Storage { message } => {
                write!(f, "Storage error: {message}")
            }
            ErrorDetails::StorageMigration { statement, message } => {
                write!(f, "Storage migration `{statement}` failed: {message}")
            }
            ErrorDetails::UnknownFeature { feature } => {
                write!(f, "Unknown feature: `{feature}`")
            }
            ErrorDetails::UnknownPlanTier { tier } => {
                write!(f, "Unknown plan tier: `{tier}`")
            }
            ErrorDetails::UnknownRateLimitClass { class } => {
                write!(f, "Unknown rate limit class: `{class}`")
            }
        }
    }
}

impl IntoResponse for Error {
    /// Log the error and convert it into an Axum response
    fn into_response(self) -> Response {
        let (status_code, body) = self.0.to_response_json();
        (status_code, Json(body)).into_response()
    }
}
