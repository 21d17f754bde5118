//! API module - HTTP handlers and routes

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::account::AccountManager;

/// Shared state for every handler
#[derive(Clone)]
pub struct ApiState {
    pub accounts: Arc<AccountManager>,
}

pub fn routes(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        // Accounts
        .route("/api/accounts", get(handlers::list_accounts))
        .route("/api/accounts/:account/devices", get(handlers::list_devices))
        .route("/api/accounts/:account/refresh", post(handlers::refresh_account))
        // Sensor readings
        .route(
            "/api/accounts/:account/devices/:device/sensors",
            get(handlers::get_sensors),
        )
        .route(
            "/api/accounts/:account/devices/:device/sensors/raw",
            get(handlers::get_sensors_raw),
        )
        .with_state(state)
}
