//! SensorSampleStore: per-device sample history and time-weighted averaging
//!
//! Readings arrive at irregular, caller-uncontrolled instants. Each fetch is
//! stored under its unix-second timestamp; on read the history is pruned to
//! the retention window and integrated as a step function (each value holds
//! until the next sample), giving a stable "current value" per sensor.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::account::devices::DeviceRegistry;
use crate::cloud::{CloudClient, SessionController, Surface};
use crate::models::{DeviceValue, DeviceValuesResponse, SampleSet};
use crate::units::{is_known_sensor, Precision, SensorId, UnitResolver};

const MAX_FETCH_ATTEMPTS: usize = 2;

/// timestamp (unix seconds) → readings
pub type SampleHistory = BTreeMap<i64, SampleSet>;

pub struct SensorSampleStore {
    history: HashMap<String, SampleHistory>,
    raw: HashMap<String, SampleSet>,
    retention_window: i64,
}

impl SensorSampleStore {
    pub fn new(retention_window_secs: i64) -> Self {
        Self {
            history: HashMap::new(),
            raw: HashMap::new(),
            retention_window: retention_window_secs,
        }
    }

    /// Make sure the device has a (possibly empty) history.
    pub fn track(&mut self, device_id: &str) {
        self.history.entry(device_id.to_string()).or_default();
    }

    #[cfg(test)]
    pub fn is_tracked(&self, device_id: &str) -> bool {
        self.history.contains_key(device_id)
    }

    #[cfg(test)]
    pub fn history(&self, device_id: &str) -> Option<&SampleHistory> {
        self.history.get(device_id)
    }

    /// Most recent timestamp in the device's history
    pub fn latest_timestamp(&self, device_id: &str) -> Option<i64> {
        self.history
            .get(device_id)
            .and_then(|h| h.keys().next_back().copied())
    }

    /// Latest fetched readings, independent of the pruned history
    pub fn raw(&self, device_id: &str) -> Option<&SampleSet> {
        self.raw.get(device_id)
    }

    /// Store one fetch as both the raw snapshot and a history entry.
    pub fn record(&mut self, device_id: &str, timestamp: i64, samples: SampleSet) {
        self.history
            .entry(device_id.to_string())
            .or_default()
            .insert(timestamp, samples.clone());
        self.raw.insert(device_id.to_string(), samples);
    }

    /// Fetch current readings for a device and record them under `timestamp`.
    ///
    /// Needs the device in the registry (for its token). A failed fetch is
    /// retried once, forced; returns false when both attempts fail.
    pub async fn ingest(
        &mut self,
        registry: &mut DeviceRegistry,
        session: &mut SessionController,
        client: &CloudClient,
        units: &UnitResolver,
        device_id: &str,
        timestamp: i64,
    ) -> bool {
        for attempt in 1..=MAX_FETCH_ATTEMPTS {
            let listed = registry.refresh(session, client, self, false).await.is_some();
            let token = listed
                .then(|| registry.get(device_id).map(|d| d.token.clone()))
                .flatten();
            let Some(token) = token else {
                tracing::error!("[Samples] Can't receive device {} from cloud", device_id);
                return false;
            };

            let params = [
                ("deviceToken", token),
                ("timestamp", timestamp.to_string()),
                ("callback", "jsoncallback".to_string()),
                ("_", timestamp.to_string()),
            ];
            let Some(resp) = client
                .query(session.session_mut(), Surface::Device, "list", &params)
                .await
            else {
                tracing::warn!(
                    "[Samples] Fetch attempt {}/{} failed for device {}",
                    attempt,
                    MAX_FETCH_ATTEMPTS,
                    device_id
                );
                continue;
            };

            match serde_json::from_value::<DeviceValuesResponse>(resp) {
                Ok(values) => {
                    let samples = sample_set_from(&values.values, units);
                    tracing::debug!("[Samples] Device {} @{}: {:?}", device_id, timestamp, samples);
                    self.record(device_id, timestamp, samples);
                    return true;
                }
                Err(e) => {
                    tracing::warn!("[Samples] Values parse failed for device {}: {}", device_id, e);
                }
            }
        }

        false
    }

    pub fn compute_average(&mut self, device_id: &str, units: &UnitResolver) -> Option<SampleSet> {
        self.compute_average_at(device_id, Utc::now().timestamp(), units)
    }

    /// Time-weighted average over the retention window ending at `now`.
    ///
    /// History is first pruned to the newest sample at or before the window's
    /// left edge (the carry-in, which supplies the value in effect at the edge)
    /// plus everything after it. Returns `None` for untracked devices and
    /// when nothing is left.
    pub fn compute_average_at(
        &mut self,
        device_id: &str,
        now: i64,
        units: &UnitResolver,
    ) -> Option<SampleSet> {
        let cutoff = now - self.retention_window;
        let history = self.history.get_mut(device_id)?;

        let lower = history
            .range(..=cutoff)
            .next_back()
            .map(|(ts, _)| *ts)
            .unwrap_or(cutoff);
        *history = history.split_off(&lower);

        let first_ts = *history.keys().next()?;
        let raw = self.raw.get(device_id);

        let mut sums: BTreeMap<SensorId, f64> = raw
            .map(|r| r.keys().map(|id| (*id, 0.0)).collect())
            .unwrap_or_default();

        let empty = SampleSet::new();
        let mut last_ts = cutoff;
        let mut last_data = &empty;
        for (ts, data) in history.iter() {
            let dt = ts - last_ts;
            if dt > 0 {
                accumulate(&mut sums, last_data, dt);
            }
            last_ts = (*ts).max(cutoff);
            last_data = data;
        }
        accumulate(&mut sums, last_data, (now - last_ts + 1).max(0));

        let length = (now - first_ts.max(cutoff) + 1).max(1) as f64;

        let averaged = sums
            .into_iter()
            .map(|(id, sum)| {
                let value = match units.precision(id) {
                    Precision::Raw => raw
                        .and_then(|r| r.get(&id))
                        .copied()
                        .unwrap_or(sum / length),
                    precision => precision.apply(sum / length),
                };
                (id, value)
            })
            .collect();

        Some(averaged)
    }
}

fn accumulate(sums: &mut BTreeMap<SensorId, f64>, data: &SampleSet, dt: i64) {
    for (id, value) in data {
        *sums.entry(*id).or_insert(0.0) += value * dt as f64;
    }
}

/// Turn raw device values into a sample set in the account's units.
///
/// Null content, unparseable content and unknown sensor ids are skipped.
pub fn sample_set_from(values: &[DeviceValue], units: &UnitResolver) -> SampleSet {
    values
        .iter()
        .filter_map(|v| {
            let id = SensorId::try_from(v.seq).ok().filter(|id| is_known_sensor(*id))?;
            let value = v.numeric_content()?;
            Some((id, units.convert(id, value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::transport::mock::ScriptedTransport;
    use crate::config::CloudConfig;
    use crate::units::{SENSOR_HCHO, SENSOR_ONLINE, SENSOR_TVOC};
    use serde_json::json;
    use std::sync::Arc;

    const TEMP: SensorId = 4;

    fn set(pairs: &[(SensorId, f64)]) -> SampleSet {
        pairs.iter().copied().collect()
    }

    fn units() -> UnitResolver {
        UnitResolver::new(false, false)
    }

    #[test]
    fn test_worked_example() {
        // cutoff = 0: 10 held over 0..5, 20 held over 5..=10
        let mut store = SensorSampleStore::new(10);
        store.record("d", 0, set(&[(TEMP, 10.0), (SENSOR_HCHO, 10.0)]));
        store.record("d", 5, set(&[(TEMP, 20.0), (SENSOR_HCHO, 20.0)]));

        let avg = store.compute_average_at("d", 10, &units()).unwrap();
        // 170 / 11 = 15.4545...
        assert_eq!(avg[&TEMP], 15.5);
        assert_eq!(avg[&SENSOR_HCHO], 15.455);
    }

    #[test]
    fn test_prune_keeps_carry_in_sample() {
        let mut store = SensorSampleStore::new(25);
        store.record("d", 10, set(&[(TEMP, 1.0)]));
        store.record("d", 20, set(&[(TEMP, 2.0)]));
        store.record("d", 30, set(&[(TEMP, 3.0)]));
        store.record("d", 5, set(&[(TEMP, 0.0)]));

        // cutoff = 15; 10 is the newest sample at or before it
        store.compute_average_at("d", 40, &units()).unwrap();
        let kept: Vec<i64> = store.history("d").unwrap().keys().copied().collect();
        assert_eq!(kept, vec![10, 20, 30]);
    }

    #[test]
    fn test_prune_without_carry_in_keeps_everything() {
        let mut store = SensorSampleStore::new(25);
        store.record("d", 20, set(&[(TEMP, 2.0)]));
        store.record("d", 30, set(&[(TEMP, 3.0)]));

        store.compute_average_at("d", 40, &units()).unwrap();
        assert_eq!(store.history("d").unwrap().len(), 2);
    }

    #[test]
    fn test_carry_in_value_fills_left_edge() {
        // cutoff = 15: A=1 holds 15..20, B=2 holds 20..30, C=3 holds 30..=40
        let mut store = SensorSampleStore::new(25);
        store.record("d", 10, set(&[(TEMP, 1.0)]));
        store.record("d", 20, set(&[(TEMP, 2.0)]));
        store.record("d", 30, set(&[(TEMP, 3.0)]));

        let avg = store.compute_average_at("d", 40, &units()).unwrap();
        // (1*5 + 2*10 + 3*11) / 26 = 58 / 26 = 2.2307...
        assert_eq!(avg[&TEMP], 2.2);
    }

    #[test]
    fn test_left_edge_before_first_sample_counts_as_zero() {
        // cutoff = 0, first sample at 4: nothing is held over 0..4
        let mut store = SensorSampleStore::new(10);
        store.record("d", 4, set(&[(SENSOR_HCHO, 1.1)]));

        let avg = store.compute_average_at("d", 10, &units()).unwrap();
        // 1.1 * 7 / (10 - 4 + 1) = 1.1
        assert_eq!(avg[&SENSOR_HCHO], 1.1);
    }

    #[test]
    fn test_window_of_one_second() {
        let mut store = SensorSampleStore::new(300);
        store.record("d", 1000, set(&[(TEMP, 21.0)]));

        let avg = store.compute_average_at("d", 1000, &units()).unwrap();
        assert_eq!(avg[&TEMP], 21.0);
    }

    #[test]
    fn test_online_flag_is_raw_passthrough() {
        let mut store = SensorSampleStore::new(10);
        store.record("d", 0, set(&[(SENSOR_ONLINE, 0.0)]));
        store.record("d", 9, set(&[(SENSOR_ONLINE, 1.0)]));

        let avg = store.compute_average_at("d", 10, &units()).unwrap();
        assert_eq!(avg[&SENSOR_ONLINE], 1.0);
    }

    #[test]
    fn test_parts_based_truncated() {
        let ppb = UnitResolver::new(true, false);
        let mut store = SensorSampleStore::new(10);
        store.record("d", 0, set(&[(SENSOR_TVOC, 100.0), (9, 400.0)]));
        store.record("d", 5, set(&[(SENSOR_TVOC, 101.0), (9, 401.0)]));

        let avg = store.compute_average_at("d", 10, &ppb).unwrap();
        // (100*5 + 101*6) / 11 = 100.545...
        assert_eq!(avg[&SENSOR_TVOC], 100.0);
        assert_eq!(avg[&9], 400.0);
    }

    #[test]
    fn test_no_history_no_result() {
        let mut store = SensorSampleStore::new(300);
        assert!(store.compute_average_at("unknown", 100, &units()).is_none());

        store.track("d");
        assert!(store.compute_average_at("d", 100, &units()).is_none());
    }

    #[test]
    fn test_unknown_device_lookup_stores_nothing() {
        let mut store = SensorSampleStore::new(300);
        store.record("d", 90, set(&[(TEMP, 20.0)]));

        for i in 0..100 {
            assert!(store.compute_average_at(&format!("nope-{i}"), 100, &units()).is_none());
        }
        assert_eq!(store.history.len(), 1);
        assert!(store.compute_average_at("d", 100, &units()).is_some());
    }

    #[test]
    fn test_average_is_idempotent() {
        let mut store = SensorSampleStore::new(25);
        store.record("d", 10, set(&[(TEMP, 1.0), (SENSOR_HCHO, 0.02)]));
        store.record("d", 20, set(&[(TEMP, 2.0), (SENSOR_HCHO, 0.05)]));

        let first = store.compute_average_at("d", 40, &units());
        let second = store.compute_average_at("d", 40, &units());
        assert_eq!(first, second);
    }

    #[test]
    fn test_same_second_overwrites() {
        let mut store = SensorSampleStore::new(300);
        store.record("d", 100, set(&[(TEMP, 1.0)]));
        store.record("d", 100, set(&[(TEMP, 2.0)]));

        assert_eq!(store.history("d").unwrap().len(), 1);
        assert_eq!(store.raw("d").unwrap()[&TEMP], 2.0);
        assert_eq!(store.latest_timestamp("d"), Some(100));
    }

    #[test]
    fn test_sample_set_filters_and_converts() {
        let values: DeviceValuesResponse = serde_json::from_value(json!({
            "deviceValueVos": [
                { "seq": 1, "content": "1" },
                { "seq": 4, "content": "23.8" },
                { "seq": 7, "content": "0.1" },
                { "seq": 8, "content": null },
                { "seq": 2, "content": "5" },
                { "seq": 300, "content": "5" },
                { "seq": 9, "content": "abc" }
            ]
        }))
        .unwrap();

        let samples = sample_set_from(&values.values, &UnitResolver::new(false, true));
        assert_eq!(samples, set(&[(SENSOR_ONLINE, 1.0), (TEMP, 23.0), (SENSOR_HCHO, 81.0)]));
    }

    fn ingest_fixture(
        transport: &Arc<ScriptedTransport>,
    ) -> (CloudClient, SessionController, DeviceRegistry, SensorSampleStore) {
        transport.push_json("loginByEmail", json!({"code": 2000, "uid": 9, "safeToken": "s"}));
        transport.push_json(
            "deviceManager",
            json!({"code": 2000, "deviceInfoBodyList": [
                {"deviceid": "d1", "pt_name": "Bedroom", "deviceToken": "dev-token"}
            ]}),
        );
        (
            CloudClient::new(transport.clone(), CloudConfig::default()),
            SessionController::new("user@example.com".into(), "pw".into()),
            DeviceRegistry::new(),
            SensorSampleStore::new(300),
        )
    }

    #[tokio::test]
    async fn test_ingest_records_sample() {
        let transport = Arc::new(ScriptedTransport::new());
        let (client, mut session, mut registry, mut store) = ingest_fixture(&transport);
        transport.push_body(
            "list",
            r#"jsoncallback({"returnCode":"0","deviceValueVos":[{"seq":4,"content":"22.4"}]})"#,
        );

        assert!(store
            .ingest(&mut registry, &mut session, &client, &units(), "d1", 1_700_000_000)
            .await);
        assert_eq!(store.raw("d1"), Some(&set(&[(TEMP, 22.0)])));
        assert_eq!(store.latest_timestamp("d1"), Some(1_700_000_000));

        let url = &transport.calls("list")[0];
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["deviceToken"], "dev-token");
        assert_eq!(query["saveToken"], "s");
        assert_eq!(query["timestamp"], "1700000000");
        assert_eq!(query["callback"], "jsoncallback");
    }

    #[tokio::test]
    async fn test_ingest_rejection_relogs_and_retries_once() {
        let transport = Arc::new(ScriptedTransport::new());
        let (client, mut session, mut registry, mut store) = ingest_fixture(&transport);
        transport.push_json("list", json!({"returnCode": 1}));
        // rejection drops the session: the retry logs in and re-lists devices
        transport.push_json("loginByEmail", json!({"code": 2000, "uid": 10, "safeToken": "s2"}));
        transport.push_json(
            "deviceManager",
            json!({"code": 2000, "deviceInfoBodyList": [
                {"deviceid": "d1", "pt_name": "Bedroom", "deviceToken": "dev-token-2"}
            ]}),
        );
        transport.push_json("list", json!({"returnCode": 1}));

        assert!(!store
            .ingest(&mut registry, &mut session, &client, &units(), "d1", 100)
            .await);
        assert_eq!(transport.calls("list").len(), 2);
        assert_eq!(transport.calls("loginByEmail").len(), 2);
        assert!(!session.is_connected());
        assert!(store.raw("d1").is_none());
    }

    #[tokio::test]
    async fn test_ingest_unknown_device() {
        let transport = Arc::new(ScriptedTransport::new());
        let (client, mut session, mut registry, mut store) = ingest_fixture(&transport);

        assert!(!store
            .ingest(&mut registry, &mut session, &client, &units(), "missing", 100)
            .await);
        assert!(transport.calls("list").is_empty());
    }
}
