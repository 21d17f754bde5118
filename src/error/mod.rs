//! Error handling module

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Failures talking to the vendor cloud.
///
/// None of these are fatal: `CloudClient::query` logs them and hands the
/// caller an absent result, and retry policy lives with the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloudError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    #[error("Login failed: invalid credentials or session")]
    AuthFailure,

    #[error("Server is busy, try again later")]
    Busy,

    #[error("API call failed with code {code}")]
    Api { code: i64 },

    #[error("Device API rejected the request (returnCode {return_code})")]
    DeviceRejected { return_code: i64 },
}

impl CloudError {
    /// True when the cloud no longer accepts the current session token.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, CloudError::AuthFailure | CloudError::DeviceRejected { .. })
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::MalformedBody(e.to_string())
    }
}

/// Orchestrator-level failures surfaced to whoever drives an account.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccountError {
    #[error("Cannot connect to account {account}: {operation} did not complete")]
    CannotConnect { account: String, operation: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<AccountError> for AppError {
    fn from(e: AccountError) -> Self {
        AppError::ServiceUnavailable(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
