//! AccountManager: registry of configured accounts
//!
//! Built by `main` at startup and handed to the API and the poller. Each
//! account is independent; one failing setup does not affect the others.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;

use crate::account::controller::AccountController;
use crate::cloud::HttpTransport;
use crate::config::{AccountConfig, CloudConfig, PollingConfig};
use crate::error::AccountError;

#[derive(Default)]
pub struct AccountManager {
    accounts: RwLock<HashMap<String, Arc<AccountController>>>,
}

impl AccountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and set up every configured account concurrently.
    ///
    /// Returns the number of accounts that came up.
    pub async fn setup_all(
        &self,
        configs: &[AccountConfig],
        cloud: &CloudConfig,
        polling: &PollingConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> usize {
        let controllers = configs.iter().map(|config| {
            Arc::new(AccountController::new(
                config.clone(),
                cloud.clone(),
                polling.clone(),
                Arc::clone(&transport),
            ))
        });

        let results = join_all(controllers.map(|c| async move {
            let result = self.register(Arc::clone(&c)).await;
            (c, result)
        }))
        .await;

        let mut ready = 0;
        for (controller, result) in results {
            match result {
                Ok(()) => ready += 1,
                Err(e) => tracing::error!(
                    "[AccountManager] Setup of {} failed: {}",
                    controller.name_secure(),
                    e
                ),
            }
        }

        tracing::info!("[AccountManager] {}/{} accounts ready", ready, configs.len());
        ready
    }

    /// Run the startup sequence for one account and register it on success.
    pub async fn register(&self, controller: Arc<AccountController>) -> Result<(), AccountError> {
        let selected = controller.setup().await?;

        tracing::info!(
            "[AccountManager] Registered {} with {} active devices: {:?}",
            controller.name_secure(),
            selected.len(),
            selected.keys().collect::<Vec<_>>()
        );

        let mut map = self.accounts.write().await;
        map.insert(controller.unique_id().to_string(), controller);
        Ok(())
    }

    pub async fn get(&self, account_id: &str) -> Option<Arc<AccountController>> {
        let map = self.accounts.read().await;
        map.get(account_id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<AccountController>> {
        let map = self.accounts.read().await;
        let mut accounts: Vec<_> = map.values().cloned().collect();
        accounts.sort_by(|a, b| a.unique_id().cmp(b.unique_id()));
        accounts
    }

    /// Drop every account; pollers holding a controller finish their current cycle.
    pub async fn shutdown(&self) {
        let mut map = self.accounts.write().await;
        let count = map.len();
        map.clear();
        tracing::info!("[AccountManager] Released {} accounts", count);
    }
}
