//! DeviceRegistry: cached device list for one account

use std::collections::HashMap;

use chrono::Utc;

use crate::account::samples::SensorSampleStore;
use crate::cloud::{CloudClient, SessionController, Surface};
use crate::models::{Device, DeviceListResponse};

const MAX_REFRESH_ATTEMPTS: usize = 2;

#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
    /// Session generation the cache was fetched under
    generation: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &HashMap<String, Device> {
        &self.devices
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// Return the device list, fetching it from the cloud when needed.
    ///
    /// The cache is served as-is unless `force` is set, it is empty, or a new
    /// login happened since it was filled. A failed fetch is retried once,
    /// forced. Every listed device gets a history slot in `samples`.
    pub async fn refresh(
        &mut self,
        session: &mut SessionController,
        client: &CloudClient,
        samples: &mut SensorSampleStore,
        force: bool,
    ) -> Option<&HashMap<String, Device>> {
        let attempts = if force { 1 } else { MAX_REFRESH_ATTEMPTS };

        for attempt in 0..attempts {
            let forced = force || attempt > 0;

            if !session.ensure_connected(client, false).await {
                tracing::error!("[Devices] Can't connect to cloud");
                return None;
            }
            if session.generation() != self.generation {
                self.devices.clear();
                self.generation = session.generation();
            }
            if !forced && !self.devices.is_empty() {
                return Some(&self.devices);
            }

            tracing::debug!("[Devices] Updating devices list");
            let params = [
                ("platform", "android".to_string()),
                ("clientType", "2".to_string()),
                ("action", "deviceManager".to_string()),
            ];
            let Some(resp) = client
                .query(session.session_mut(), Surface::Account, "deviceManager", &params)
                .await
            else {
                continue;
            };

            let listing = match serde_json::from_value::<DeviceListResponse>(resp) {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!("[Devices] Device list parse failed: {}", e);
                    continue;
                }
            };

            let now = Utc::now();
            self.devices = listing
                .devices
                .into_iter()
                .map(|mut device| {
                    device.refreshed_at = now;
                    (device.id.clone(), device)
                })
                .collect();

            for device_id in self.devices.keys() {
                samples.track(device_id);
            }

            tracing::info!("[Devices] {} devices listed", self.devices.len());
            return Some(&self.devices);
        }

        None
    }
}
