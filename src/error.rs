//! Error types for consultr.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;

use crate::provider::ProviderId;

/// Result type alias for consultr operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for consultr.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Rate limit reached for provider '{provider}', retry in {retry_after_secs}s")]
    RateLimited {
        provider: ProviderId,
        retry_after_secs: u64,
    },

    #[error("Circuit breaker open for provider '{provider}': {reason}")]
    CircuitOpen { provider: ProviderId, reason: String },

    #[error("Provider '{provider}' timed out after {secs:.1}s", secs = timeout.as_secs_f64())]
    ProviderTimeout {
        provider: ProviderId,
        timeout: Duration,
    },

    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: ProviderId, message: String },

    #[error("No AI providers available for this request")]
    NoProviderAvailable,

    #[error("All consultations failed ({attempted} provider(s) attempted)")]
    AllProvidersFailed { attempted: usize },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Serializable tag for per-provider failures recorded in outcome lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    CircuitOpen,
    Timeout,
    ProviderError,
    NoProviderAvailable,
    AllProvidersFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::NoProviderAvailable => "no_provider_available",
            ErrorKind::AllProvidersFailed => "all_providers_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::ProviderTimeout { .. } => ErrorKind::Timeout,
            Error::Provider { .. } => ErrorKind::ProviderError,
            Error::NoProviderAvailable => ErrorKind::NoProviderAvailable,
            Error::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            Error::Config(_) | Error::BadRequest(_) | Error::Internal(_) | Error::Database(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::ProviderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Provider { .. } => StatusCode::BAD_GATEWAY,
            Error::NoProviderAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::AllProvidersFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
