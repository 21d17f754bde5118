//! AccountController: one configured cloud account
//!
//! Owns the session, the device cache and the sample history of a single
//! account behind one async mutex, so every operation on the account is
//! serialized. The timeout-wrapped operations run the fetch on its own task:
//! if the caller gives up, the fetch still finishes and commits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};

use crate::account::devices::DeviceRegistry;
use crate::account::samples::SensorSampleStore;
use crate::cloud::{CloudClient, HttpTransport, SessionController};
use crate::config::{AccountConfig, CloudConfig, PollingConfig};
use crate::error::AccountError;
use crate::models::{Device, SampleSet};
use crate::notify::{SensorsUpdated, UpdateNotifier};
use crate::units::UnitResolver;
use crate::util::mask_email;

/// Outcome of one sensor poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorsUpdate {
    pub fetched: usize,
    pub failed: usize,
    /// Devices whose newest sample was too recent to re-fetch
    pub skipped: usize,
}

struct AccountState {
    session: SessionController,
    registry: DeviceRegistry,
    samples: SensorSampleStore,
    active_devices: Vec<String>,
}

pub struct AccountController {
    config: AccountConfig,
    polling: PollingConfig,
    units: UnitResolver,
    client: CloudClient,
    notifier: UpdateNotifier,
    state: Mutex<AccountState>,
}

impl AccountController {
    pub fn new(
        config: AccountConfig,
        cloud: CloudConfig,
        polling: PollingConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let state = AccountState {
            session: SessionController::new(config.username.clone(), config.password.clone()),
            registry: DeviceRegistry::new(),
            samples: SensorSampleStore::new(polling.retention_window_secs),
            active_devices: Vec::new(),
        };

        Self {
            units: UnitResolver::new(config.receive_tvoc_in_ppb, config.receive_hcho_in_ppb),
            client: CloudClient::new(transport, cloud),
            notifier: UpdateNotifier::new(),
            state: Mutex::new(state),
            config,
            polling,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.config.username
    }

    /// Account name safe for logs
    pub fn name_secure(&self) -> String {
        mask_email(&self.config.username)
    }

    pub fn units(&self) -> &UnitResolver {
        &self.units
    }

    pub fn scan_interval(&self) -> Duration {
        self.config.scan_interval(&self.polling)
    }

    pub fn update_timeout(&self) -> Duration {
        self.polling.update_timeout()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorsUpdated> {
        self.notifier.subscribe()
    }

    pub async fn available(&self) -> bool {
        self.state.lock().await.session.is_connected()
    }

    /// Devices known from the last successful listing
    pub async fn devices(&self) -> HashMap<String, Device> {
        self.state.lock().await.registry.devices().clone()
    }

    pub async fn active_devices(&self) -> Vec<String> {
        self.state.lock().await.active_devices.clone()
    }

    pub async fn set_active_devices(&self, devices: Vec<String>) {
        let mut state = self.state.lock().await;
        for device_id in &devices {
            state.samples.track(device_id);
        }
        state.active_devices = devices;
    }

    pub async fn update_devices(&self, force: bool) -> Option<HashMap<String, Device>> {
        tracing::debug!("[Account] Updating devices list for {}", self.name_secure());

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state
            .registry
            .refresh(&mut state.session, &self.client, &mut state.samples, force)
            .await
            .cloned()
    }

    /// Fetch the device list, failing with `CannotConnect` if no non-empty
    /// list is available within `timeout`.
    pub async fn update_devices_with_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<HashMap<String, Device>, AccountError> {
        let start = Instant::now();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.update_devices(false).await });

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Some(devices))) if !devices.is_empty() => Ok(devices),
            Ok(Ok(_)) => {
                tracing::error!("[Account] No devices available for {}", self.name_secure());
                Err(self.cannot_connect("device list"))
            }
            Ok(Err(e)) => {
                tracing::error!(
                    "[Account] Unexpected error fetching {} devices list: {}",
                    self.name_secure(),
                    e
                );
                Err(self.cannot_connect("device list"))
            }
            Err(_) => {
                tracing::error!("[Account] Timeout fetching {} devices list", self.name_secure());
                Err(self.cannot_connect("device list"))
            }
        };

        tracing::debug!(
            "[Account] Finished fetching {} devices list in {:.3} seconds",
            self.name_secure(),
            start.elapsed().as_secs_f64()
        );
        result
    }

    /// Pick the devices to poll from `devices` using the configured name
    /// allowlist (empty allowlist = all). Returns name → device id.
    pub async fn select_active_devices(
        &self,
        devices: &HashMap<String, Device>,
    ) -> BTreeMap<String, String> {
        let selected: BTreeMap<String, String> = devices
            .values()
            .filter(|d| self.config.devices.is_empty() || self.config.devices.contains(&d.name))
            .map(|d| (d.name.clone(), d.id.clone()))
            .collect();

        for name in &self.config.devices {
            if !selected.contains_key(name) {
                tracing::warn!("[Account] Device \"{}\" not found on {}", name, self.name_secure());
            }
        }

        self.set_active_devices(selected.values().cloned().collect()).await;
        selected
    }

    /// Poll every active device whose newest sample is older than the
    /// minimum re-fetch interval, then notify subscribers.
    ///
    /// Holds the account lock for the whole cycle: reads of this account
    /// wait until it ends.
    pub async fn update_sensors(&self) -> SensorsUpdate {
        tracing::debug!("[Account] Updating sensors state for {}", self.name_secure());

        let now = Utc::now().timestamp();
        let mut report = SensorsUpdate::default();
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            for device_id in state.active_devices.clone() {
                let recent = state
                    .samples
                    .latest_timestamp(&device_id)
                    .is_some_and(|ts| ts >= now - self.polling.min_refetch_interval_secs);
                if recent {
                    report.skipped += 1;
                    continue;
                }

                let ok = state
                    .samples
                    .ingest(
                        &mut state.registry,
                        &mut state.session,
                        &self.client,
                        &self.units,
                        &device_id,
                        now,
                    )
                    .await;
                if ok {
                    report.fetched += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        self.notifier.notify();
        report
    }

    /// Run one sensor poll cycle, failing with `CannotConnect` on timeout or
    /// when every attempted fetch failed.
    pub async fn update_sensors_with_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<SensorsUpdate, AccountError> {
        let start = Instant::now();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.update_sensors().await });

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(report)) if report.failed > 0 && report.fetched == 0 => {
                tracing::error!(
                    "[Account] All {} sensor fetches failed for {}",
                    report.failed,
                    self.name_secure()
                );
                Err(self.cannot_connect("sensor update"))
            }
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => {
                tracing::error!(
                    "[Account] Unexpected error fetching {} device's sensors: {}",
                    self.name_secure(),
                    e
                );
                Err(self.cannot_connect("sensor update"))
            }
            Err(_) => {
                tracing::error!("[Account] Timeout fetching {} device's sensors", self.name_secure());
                Err(self.cannot_connect("sensor update"))
            }
        };

        tracing::debug!(
            "[Account] Finished fetching {} device's sensors in {:.3} seconds",
            self.name_secure(),
            start.elapsed().as_secs_f64()
        );
        result
    }

    /// Latest raw readings of a device
    pub async fn get_sensors_raw(&self, device_id: &str) -> Option<SampleSet> {
        self.state.lock().await.samples.raw(device_id).cloned()
    }

    /// Time-weighted, unit-converted readings of a device
    pub async fn get_sensors(&self, device_id: &str) -> Option<SampleSet> {
        self.state
            .lock()
            .await
            .samples
            .compute_average(device_id, &self.units)
    }

    /// Startup sequence: device list, active device selection, first poll.
    pub async fn setup(self: &Arc<Self>) -> Result<BTreeMap<String, String>, AccountError> {
        tracing::debug!("[Account] Connecting to account {}", self.name_secure());

        let timeout = self.update_timeout();
        let devices = self.update_devices_with_timeout(timeout).await?;
        let selected = self.select_active_devices(&devices).await;
        self.update_sensors_with_timeout(timeout).await?;

        Ok(selected)
    }

    fn cannot_connect(&self, operation: &str) -> AccountError {
        AccountError::CannotConnect {
            account: self.name_secure(),
            operation: operation.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cloud::transport::mock::ScriptedTransport;
    use crate::units::SENSOR_ONLINE;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use url::Url;

    use crate::cloud::transport::HttpResponse;
    use crate::error::CloudError;

    pub(crate) fn account_config(devices: &[&str]) -> AccountConfig {
        AccountConfig {
            username: "user@example.com".to_string(),
            password: "pw".to_string(),
            devices: devices.iter().map(|d| d.to_string()).collect(),
            receive_tvoc_in_ppb: false,
            receive_hcho_in_ppb: false,
            scan_interval_secs: None,
        }
    }

    /// Login + two devices + one reading per device
    pub(crate) fn script_happy_path(transport: &ScriptedTransport) {
        transport.push_json("loginByEmail", json!({"code": 2000, "uid": 9, "safeToken": "s"}));
        transport.push_json(
            "deviceManager",
            json!({"code": 2000, "deviceInfoBodyList": [
                {"deviceid": "d1", "pt_name": "Bedroom", "deviceToken": "t1"},
                {"deviceid": "d2", "pt_name": "Office", "deviceToken": "t2"}
            ]}),
        );
        for _ in 0..2 {
            transport.push_body(
                "list",
                r#"jsoncallback({"returnCode":"0","deviceValueVos":[{"seq":1,"content":"1"},{"seq":4,"content":"21.6"},{"seq":8,"content":"0.12"}]})"#,
            );
        }
    }

    pub(crate) fn controller(
        transport: Arc<dyn HttpTransport>,
        devices: &[&str],
    ) -> Arc<AccountController> {
        Arc::new(AccountController::new(
            account_config(devices),
            CloudConfig::default(),
            PollingConfig::default(),
            transport,
        ))
    }

    /// Never answers within any reasonable timeout
    struct StalledTransport;

    #[async_trait]
    impl HttpTransport for StalledTransport {
        async fn get(
            &self,
            _url: &Url,
            _user_agent: &str,
            _timeout: Duration,
        ) -> Result<HttpResponse, CloudError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(CloudError::Transport("stalled".into()))
        }
    }

    /// Answers from a script, but only after `delay` for sensor value requests
    struct SlowValuesTransport {
        inner: ScriptedTransport,
        delay: Duration,
    }

    #[async_trait]
    impl HttpTransport for SlowValuesTransport {
        async fn get(
            &self,
            url: &Url,
            user_agent: &str,
            timeout: Duration,
        ) -> Result<HttpResponse, CloudError> {
            if url.path().ends_with("/list") {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.get(url, user_agent, timeout).await
        }
    }

    #[tokio::test]
    async fn test_setup_selects_all_devices_without_allowlist() {
        let transport = Arc::new(ScriptedTransport::new());
        script_happy_path(&transport);
        let account = controller(transport.clone(), &[]);

        let selected = assert_ok!(account.setup().await);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected["Bedroom"], "d1");
        assert!(account.available().await);

        let mut active = account.active_devices().await;
        active.sort();
        assert_eq!(active, vec!["d1".to_string(), "d2".to_string()]);
        assert_eq!(transport.calls("list").len(), 2);
    }

    #[tokio::test]
    async fn test_setup_honors_allowlist() {
        let transport = Arc::new(ScriptedTransport::new());
        script_happy_path(&transport);
        let account = controller(transport.clone(), &["Office", "Garage"]);

        let selected = assert_ok!(account.setup().await);
        assert_eq!(selected.keys().collect::<Vec<_>>(), vec!["Office"]);
        assert_eq!(account.active_devices().await, vec!["d2".to_string()]);
        assert_eq!(transport.calls("list").len(), 1);
    }

    #[tokio::test]
    async fn test_readings_after_setup() {
        let transport = Arc::new(ScriptedTransport::new());
        script_happy_path(&transport);
        let account = controller(transport, &[]);
        assert_ok!(account.setup().await);

        let raw = account.get_sensors_raw("d1").await.unwrap();
        assert_eq!(raw[&4], 21.0);
        assert_eq!(raw[&8], 0.12);

        let avg = account.get_sensors("d1").await.unwrap();
        assert_eq!(avg[&SENSOR_ONLINE], 1.0);
        assert_eq!(avg[&4], 21.0);
        assert_eq!(avg[&8], 0.12);

        assert!(account.get_sensors("unknown").await.is_none());
        assert!(account.get_sensors_raw("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_recent_devices_are_not_refetched() {
        let transport = Arc::new(ScriptedTransport::new());
        script_happy_path(&transport);
        let account = controller(transport.clone(), &[]);
        assert_ok!(account.setup().await);

        let report = account.update_sensors().await;
        assert_eq!(report, SensorsUpdate { fetched: 0, failed: 0, skipped: 2 });
        assert_eq!(transport.calls("list").len(), 2);
    }

    #[tokio::test]
    async fn test_update_sensors_notifies_subscribers() {
        let transport = Arc::new(ScriptedTransport::new());
        script_happy_path(&transport);
        let account = controller(transport, &[]);
        let mut updates = account.subscribe();

        assert_ok!(account.setup().await);
        assert_eq!(updates.try_recv().unwrap(), SensorsUpdated);

        account.update_sensors().await;
        assert_eq!(updates.try_recv().unwrap(), SensorsUpdated);
    }

    #[tokio::test]
    async fn test_device_list_failure_is_cannot_connect() {
        let transport = Arc::new(ScriptedTransport::new());
        let account = controller(transport, &[]);

        let err = assert_err!(account.update_devices_with_timeout(Duration::from_secs(5)).await);
        assert_eq!(
            err,
            AccountError::CannotConnect {
                account: "u**r@example.com".to_string(),
                operation: "device list".to_string(),
            }
        );
        assert!(!account.available().await);
    }

    #[tokio::test]
    async fn test_all_fetches_failing_is_cannot_connect() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json("loginByEmail", json!({"code": 2000, "uid": 9, "safeToken": "s"}));
        transport.push_json(
            "deviceManager",
            json!({"code": 2000, "deviceInfoBodyList": [
                {"deviceid": "d1", "pt_name": "Bedroom", "deviceToken": "t1"}
            ]}),
        );
        let account = controller(transport, &[]);

        let devices = assert_ok!(account.update_devices_with_timeout(Duration::from_secs(5)).await);
        account.select_active_devices(&devices).await;

        assert_err!(account.update_sensors_with_timeout(Duration::from_secs(5)).await);
        assert!(account.get_sensors("d1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_fetch_commits_after_timeout() {
        let inner = ScriptedTransport::new();
        inner.push_json("loginByEmail", json!({"code": 2000, "uid": 9, "safeToken": "s"}));
        inner.push_json(
            "deviceManager",
            json!({"code": 2000, "deviceInfoBodyList": [
                {"deviceid": "d1", "pt_name": "Bedroom", "deviceToken": "t1"}
            ]}),
        );
        inner.push_body(
            "list",
            r#"jsoncallback({"returnCode":"0","deviceValueVos":[{"seq":4,"content":"19.2"}]})"#,
        );
        let transport = Arc::new(SlowValuesTransport {
            inner,
            delay: Duration::from_secs(30),
        });
        let account = controller(transport, &[]);

        let devices = assert_ok!(account.update_devices_with_timeout(Duration::from_secs(5)).await);
        account.select_active_devices(&devices).await;
        let mut updates = account.subscribe();

        let err = assert_err!(account.update_sensors_with_timeout(Duration::from_secs(5)).await);
        assert!(matches!(err, AccountError::CannotConnect { .. }));
        assert!(updates.try_recv().is_err());

        // the abandoned cycle keeps running and commits its sample
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(updates.recv().await.unwrap(), SensorsUpdated);
        assert_eq!(account.get_sensors_raw("d1").await.unwrap()[&4], 19.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_cannot_connect() {
        let account = controller(Arc::new(StalledTransport), &[]);

        let err = assert_err!(account.update_devices_with_timeout(Duration::from_secs(60)).await);
        assert!(matches!(err, AccountError::CannotConnect { .. }));
    }
}
