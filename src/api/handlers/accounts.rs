//! Account handlers

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::api::ApiState;
use crate::error::AppError;
use crate::models::AccountSummary;

use super::find_account;

/// GET /api/accounts - List registered accounts
pub async fn list_accounts(State(state): State<ApiState>) -> impl IntoResponse {
    let mut summaries = Vec::new();

    for account in state.accounts.list().await {
        summaries.push(AccountSummary {
            account: account.name_secure(),
            available: account.available().await,
            device_count: account.devices().await.len(),
            active_devices: account.active_devices().await,
        });
    }

    Json(summaries)
}

/// GET /api/accounts/:account/devices - Cached device list
pub async fn list_devices(
    State(state): State<ApiState>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account = find_account(&state, &account_id).await?;

    let mut devices: Vec<_> = account.devices().await.into_values().collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(devices))
}

/// POST /api/accounts/:account/refresh - Run a poll cycle now
pub async fn refresh_account(
    State(state): State<ApiState>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let account = find_account(&state, &account_id).await?;

    let report = account
        .update_sensors_with_timeout(account.update_timeout())
        .await?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "fetched": report.fetched,
        "failed": report.failed,
        "skipped": report.skipped,
    })))
}
