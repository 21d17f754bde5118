//! Sensor tables and unit resolution
//!
//! The cloud identifies readings by a small integer (`seq`). Every known id is
//! either a continuous sensor or a binary one; anything else is ignored.

use std::collections::BTreeMap;

use serde::Serialize;

pub type SensorId = u8;

/// Connectivity flag, reported as a binary sensor and never averaged
pub const SENSOR_ONLINE: SensorId = 1;
pub const SENSOR_HCHO: SensorId = 7;
pub const SENSOR_TVOC: SensorId = 8;

/// Molar weight of the TVOC reference gas (g/mol)
pub const MWEIGHT_TVOC: f64 = 56.1060;
/// Molar weight of formaldehyde (g/mol)
pub const MWEIGHT_HCHO: f64 = 30.0260;
/// Molar volume of an ideal gas at 25°C and 1 atm (L/mol)
const MOLAR_VOLUME: f64 = 24.45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "µg/m³")]
    MicrogramsPerCubicMeter,
    #[serde(rename = "mg/m³")]
    MilligramsPerCubicMeter,
    #[serde(rename = "ppm")]
    PartsPerMillion,
    #[serde(rename = "ppb")]
    PartsPerBillion,
}

impl Unit {
    pub fn is_parts_based(&self) -> bool {
        matches!(self, Unit::PartsPerMillion | Unit::PartsPerBillion)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SensorSpec {
    pub id: SensorId,
    pub name: &'static str,
    pub unit: Option<Unit>,
}

pub const SENSORS: &[SensorSpec] = &[
    SensorSpec { id: 4, name: "Temperature", unit: Some(Unit::Celsius) },
    SensorSpec { id: 5, name: "Humidity", unit: Some(Unit::Percent) },
    SensorSpec { id: 6, name: "PM 2.5", unit: Some(Unit::MicrogramsPerCubicMeter) },
    SensorSpec { id: SENSOR_HCHO, name: "HCHO", unit: Some(Unit::MilligramsPerCubicMeter) },
    SensorSpec { id: SENSOR_TVOC, name: "TVOC", unit: Some(Unit::MilligramsPerCubicMeter) },
    SensorSpec { id: 9, name: "eCO2", unit: Some(Unit::PartsPerMillion) },
];

pub const BINARY_SENSORS: &[SensorSpec] = &[SensorSpec {
    id: SENSOR_ONLINE,
    name: "Online",
    unit: None,
}];

/// Look a sensor up in either table.
pub fn sensor_spec(id: SensorId) -> Option<&'static SensorSpec> {
    SENSORS.iter().chain(BINARY_SENSORS.iter()).find(|s| s.id == id)
}

pub fn is_known_sensor(id: SensorId) -> bool {
    sensor_spec(id).is_some()
}

/// Factor turning a mass concentration (mg/m³) into ppb for a gas of the given molar weight.
pub fn ppb_factor(molar_weight: f64) -> f64 {
    1000.0 * MOLAR_VOLUME / molar_weight
}

/// How an averaged reading is rounded before it is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Latest raw value, the average is ignored
    Raw,
    /// Truncated toward zero
    Integer,
    Decimals(u32),
}

impl Precision {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Precision::Raw => value,
            Precision::Integer => value.trunc(),
            Precision::Decimals(places) => {
                let scale = 10f64.powi(*places as i32);
                (value * scale).round() / scale
            }
        }
    }
}

/// Per-account unit map, honoring the ppb preference flags.
#[derive(Debug, Clone)]
pub struct UnitResolver {
    units: BTreeMap<SensorId, Option<Unit>>,
    tvoc_in_ppb: bool,
    hcho_in_ppb: bool,
}

impl UnitResolver {
    pub fn new(tvoc_in_ppb: bool, hcho_in_ppb: bool) -> Self {
        let mut units = BTreeMap::new();
        for spec in BINARY_SENSORS {
            units.insert(spec.id, spec.unit);
        }
        for spec in SENSORS {
            let unit = if (tvoc_in_ppb && spec.id == SENSOR_TVOC)
                || (hcho_in_ppb && spec.id == SENSOR_HCHO)
            {
                Some(Unit::PartsPerBillion)
            } else {
                spec.unit
            };
            units.insert(spec.id, unit);
        }

        Self {
            units,
            tvoc_in_ppb,
            hcho_in_ppb,
        }
    }

    pub fn unit(&self, id: SensorId) -> Option<Unit> {
        self.units.get(&id).copied().flatten()
    }

    pub fn units(&self) -> &BTreeMap<SensorId, Option<Unit>> {
        &self.units
    }

    /// Convert a reading as delivered by the cloud into the account's unit.
    ///
    /// Mass concentrations are kept as real numbers; everything else is truncated.
    pub fn convert(&self, id: SensorId, value: f64) -> f64 {
        let value = match id {
            SENSOR_TVOC if self.tvoc_in_ppb => value * ppb_factor(MWEIGHT_TVOC),
            SENSOR_HCHO if self.hcho_in_ppb => value * ppb_factor(MWEIGHT_HCHO),
            _ => value,
        };

        if self.unit(id) == Some(Unit::MilligramsPerCubicMeter) {
            value
        } else {
            value.trunc()
        }
    }

    pub fn precision(&self, id: SensorId) -> Precision {
        if id == SENSOR_ONLINE {
            return Precision::Raw;
        }
        match self.unit(id) {
            Some(unit) if unit.is_parts_based() => Precision::Integer,
            Some(Unit::MilligramsPerCubicMeter) => Precision::Decimals(3),
            _ => Precision::Decimals(1),
        }
    }
}
