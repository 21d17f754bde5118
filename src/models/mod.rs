//! Data models for the JQ-300 gateway

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::units::{SensorId, Unit};

/// One fetch worth of readings: sensor id → value
pub type SampleSet = BTreeMap<SensorId, f64>;

// ============================================================================
// Devices
// ============================================================================

/// A meter registered on the account, as last reported by the device listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "deviceid", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "pt_name", default)]
    pub name: String,
    #[serde(rename = "deviceToken", default, skip_serializing)]
    pub token: String,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub refreshed_at: DateTime<Utc>,
}

// ============================================================================
// Cloud payloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub uid: i64,
    #[serde(rename = "safeToken")]
    pub safe_token: String,
}

#[derive(Debug, Deserialize)]
pub struct DeviceListResponse {
    #[serde(rename = "deviceInfoBodyList", default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceValuesResponse {
    #[serde(rename = "deviceValueVos", default)]
    pub values: Vec<DeviceValue>,
}

/// A single raw reading; `content` arrives as a string, a number or null.
#[derive(Debug, Deserialize)]
pub struct DeviceValue {
    pub seq: i64,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

impl DeviceValue {
    pub fn numeric_content(&self) -> Option<f64> {
        match self.content.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Accepts `"123"` and `123` alike.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

// ============================================================================
// API responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub account: String,
    pub available: bool,
    pub device_count: usize,
    pub active_devices: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    pub name: String,
    pub unit: Option<Unit>,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct DeviceReadings {
    pub device_id: String,
    pub readings: Vec<SensorReading>,
}
