//! HTTP handlers module

mod accounts;
mod sensors;

pub use self::accounts::*;
pub use self::sensors::*;

use std::sync::Arc;

use axum::{response::IntoResponse, Json};
use serde::Serialize;

use crate::account::AccountController;
use crate::api::ApiState;
use crate::error::AppError;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "jq300-gateway".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn find_account(state: &ApiState, account_id: &str) -> Result<Arc<AccountController>, AppError> {
    state
        .accounts
        .get(account_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Account {} not registered", account_id)))
}
