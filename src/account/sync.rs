//! AccountSyncer: periodic sensor polling for all registered accounts
//!
//! One background tokio task per account, each on its own scan interval, so
//! a slow account never delays another. A failed cycle only logs; the cached
//! state stays in place until the next tick.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::account::controller::AccountController;
use crate::account::manager::AccountManager;

pub struct AccountSyncer {
    manager: Arc<AccountManager>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AccountSyncer {
    pub fn new(manager: Arc<AccountManager>) -> Self {
        Self {
            manager,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a poll loop for every registered account.
    pub async fn start(&self) {
        let accounts = self.manager.list().await;
        let mut tasks = self.tasks.lock().await;

        for account in accounts {
            tracing::info!(
                "[AccountSync] Polling {} every {}s",
                account.name_secure(),
                account.scan_interval().as_secs()
            );
            tasks.push(tokio::spawn(poll_account(account)));
        }
    }

    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("[AccountSync] Stopped");
    }
}

/// Poll loop for one account (runs until aborted).
async fn poll_account(account: Arc<AccountController>) {
    let period = account.scan_interval();
    // setup already fetched once, so the first tick is one period out
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match account.update_sensors_with_timeout(account.update_timeout()).await {
            Ok(report) => tracing::debug!(
                "[AccountSync] {}: {} fetched, {} failed, {} skipped",
                account.name_secure(),
                report.fetched,
                report.failed,
                report.skipped
            ),
            Err(e) => tracing::warn!("[AccountSync] Poll cycle aborted: {}", e),
        }
    }
}
