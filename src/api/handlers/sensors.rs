//! Sensor reading handlers

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::account::AccountController;
use crate::api::ApiState;
use crate::error::AppError;
use crate::models::{DeviceReadings, SampleSet, SensorReading};
use crate::units::sensor_spec;

use super::find_account;

/// GET /api/accounts/:account/devices/:device/sensors - Averaged readings
pub async fn get_sensors(
    State(state): State<ApiState>,
    Path((account_id, device_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let account = find_account(&state, &account_id).await?;

    let samples = account
        .get_sensors(&device_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No readings for device {}", device_id)))?;

    Ok(Json(readings(&account, device_id, samples)))
}

/// GET /api/accounts/:account/devices/:device/sensors/raw - Latest raw readings
pub async fn get_sensors_raw(
    State(state): State<ApiState>,
    Path((account_id, device_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let account = find_account(&state, &account_id).await?;

    let samples = account
        .get_sensors_raw(&device_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No readings for device {}", device_id)))?;

    Ok(Json(readings(&account, device_id, samples)))
}

fn readings(account: &AccountController, device_id: String, samples: SampleSet) -> DeviceReadings {
    let readings = samples
        .into_iter()
        .map(|(sensor_id, value)| SensorReading {
            sensor_id,
            name: sensor_spec(sensor_id)
                .map(|s| s.name.to_string())
                .unwrap_or_else(|| format!("Sensor {}", sensor_id)),
            unit: account.units().unit(sensor_id),
            value,
        })
        .collect();

    DeviceReadings { device_id, readings }
}
