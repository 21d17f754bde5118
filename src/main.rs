//! jq300-gateway - JQ-300 air quality cloud poller
//!
//! Logs in to the vendor cloud for each configured account, polls the
//! sensors of its devices and serves time-weighted readings over HTTP.

mod account;
mod api;
mod cloud;
mod config;
mod error;
mod models;
mod notify;
mod units;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::account::{AccountController, AccountManager, AccountSyncer};
use crate::api::ApiState;
use crate::cloud::ReqwestTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jq300_gateway=info,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting jq300-gateway v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::Config::load()?;
    tracing::info!("Configuration loaded ({} accounts)", config.accounts.len());

    // Set up accounts
    let transport = Arc::new(ReqwestTransport::new()?);
    let accounts = Arc::new(AccountManager::new());
    let ready = accounts
        .setup_all(&config.accounts, &config.cloud, &config.polling, transport)
        .await;
    if ready == 0 && !config.accounts.is_empty() {
        tracing::warn!("No account could be set up; retry by restarting once the cloud is reachable");
    }

    for account in accounts.list().await {
        spawn_update_logger(account);
    }

    // Start background polling
    let syncer = Arc::new(AccountSyncer::new(accounts.clone()));
    syncer.start().await;

    // Build application router
    let app = api::routes(ApiState {
        accounts: accounts.clone(),
    })
    .layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    syncer.stop().await;
    accounts.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Log fresh readings after every completed poll cycle of `account`.
fn spawn_update_logger(account: Arc<AccountController>) {
    let mut updates = account.subscribe();
    tokio::spawn(async move {
        while notify::next_update(&mut updates).await {
            for device_id in account.active_devices().await {
                match account.get_sensors(&device_id).await {
                    Some(readings) => {
                        tracing::info!("[{}] device {}: {:?}", account.name_secure(), device_id, readings)
                    }
                    None => tracing::debug!("[{}] device {}: no data", account.name_secure(), device_id),
                }
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
