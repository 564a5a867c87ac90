use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Failure of one outbound call after the pipeline has exhausted its retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Request timeout - upstream response took too long")]
    Timeout,

    #[error("Rate limited by upstream provider")]
    RateLimited,

    #[error("Network error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Network { status: Option<u16>, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        FetchError::Network { status: None, message: message.into() }
    }

    /// Throttling and transport failures are worth another attempt; a
    /// non-success status or a malformed payload is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited | FetchError::Network { status: None, .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum UberWalletError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to {operation}: {source}")]
    Lookup {
        operation: &'static str,
        #[source]
        source: FetchError,
    },
}

impl UberWalletError {
    pub fn lookup(operation: &'static str) -> impl FnOnce(FetchError) -> Self {
        move |source| UberWalletError::Lookup { operation, source }
    }

    fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            UberWalletError::Fetch(e) => Some(e),
            UberWalletError::Lookup { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
}

impl IntoResponse for UberWalletError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        let (status, error_code) = match (&self, self.fetch_error()) {
            (_, Some(FetchError::Timeout)) => (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT"),
            (_, Some(FetchError::RateLimited)) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            (_, Some(FetchError::NotFound(_))) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            (_, Some(_)) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            (UberWalletError::InvalidInput(_), None) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
        };

        tracing::error!(
            error = ?self,
            error_code = error_code,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}
