//! Projection of snapshot fields onto the sensor catalog.
//!
//! The main and system catalogs are fixed. On top of those, one Current and
//! one Total sensor are instantiated per inverter key discovered under
//! `solarReadings` in the first snapshot; that enumeration happens exactly
//! once, later key changes do not alter the sensor set until restart.

use crate::model::{Snapshot, DEVICE_NAME, SOLAR_READINGS_KEY};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde_json::Value;
use std::sync::Mutex;

/// Prefix for stable sensor ids.
pub const DOMAIN: &str = "daytopper";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Power,
    Energy,
    SignalStrength,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    Measurement,
    /// Cumulative counter; projected values never decrease.
    TotalIncreasing,
}

/// Fixed catalog entry known at compile time.
pub struct StaticDef {
    pub name: &'static str,
    pub path: &'static [&'static str],
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub divisor: f64,
    pub diagnostic: bool,
}

/// Template instantiated once per discovered inverter.
pub struct TemplateDef {
    pub label: &'static str,
    pub field: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub divisor: f64,
}

/* Main totals first. The device reports total production in Wh. */
pub const MAIN_SENSORS: &[StaticDef] = &[
    StaticDef {
        name: "Solar Daytopper Current",
        path: &["solarReadingTotal", "current"],
        unit: Some("W"),
        device_class: Some(DeviceClass::Power),
        state_class: Some(StateClass::Measurement),
        divisor: 1.0,
        diagnostic: false,
    },
    StaticDef {
        name: "Solar Daytopper Total",
        path: &["solarReadingTotal", "total"],
        unit: Some("kWh"),
        device_class: Some(DeviceClass::Energy),
        state_class: Some(StateClass::TotalIncreasing),
        divisor: 1000.0,
        diagnostic: false,
    },
];

/* System info sensors last. */
pub const SYSTEM_SENSORS: &[StaticDef] = &[
    StaticDef {
        name: "Solar Daytopper WiFi Strength",
        path: &["system", "wifiStrengthRaw"],
        unit: Some("dBm"),
        device_class: Some(DeviceClass::SignalStrength),
        state_class: Some(StateClass::Measurement),
        divisor: 1.0,
        diagnostic: true,
    },
    StaticDef {
        name: "Solar Daytopper WiFi Status",
        path: &["system", "wifiStrength"],
        unit: None,
        device_class: None,
        state_class: None,
        divisor: 1.0,
        diagnostic: true,
    },
    StaticDef {
        name: "Solar Daytopper Hostname",
        path: &["system", "wifiHostname"],
        unit: None,
        device_class: None,
        state_class: None,
        divisor: 1.0,
        diagnostic: true,
    },
    StaticDef {
        name: "Solar Daytopper Uptime",
        path: &["system", "upSince"],
        unit: None,
        device_class: Some(DeviceClass::Timestamp),
        state_class: None,
        divisor: 1.0,
        diagnostic: true,
    },
    StaticDef {
        name: "Solar Daytopper Last API Call",
        path: &["system", "lastApiCall"],
        unit: None,
        device_class: Some(DeviceClass::Timestamp),
        state_class: None,
        divisor: 1.0,
        diagnostic: true,
    },
    StaticDef {
        name: "Solar Daytopper Firmware Version",
        path: &["system", "firmwareVersion"],
        unit: None,
        device_class: None,
        state_class: None,
        divisor: 1.0,
        diagnostic: true,
    },
    StaticDef {
        name: "Solar Daytopper IP",
        path: &["system", "ip"],
        unit: None,
        device_class: None,
        state_class: None,
        divisor: 1.0,
        diagnostic: true,
    },
    StaticDef {
        name: "Solar Daytopper Last Updated",
        path: &["_last_update"],
        unit: None,
        device_class: Some(DeviceClass::Timestamp),
        state_class: None,
        divisor: 1.0,
        diagnostic: true,
    },
];

/* One Current and one Total sensor per discovered inverter. */
pub const INVERTER_SENSOR_TEMPLATE: &[TemplateDef] = &[
    TemplateDef {
        label: "Current",
        field: "current",
        unit: Some("W"),
        device_class: Some(DeviceClass::Power),
        state_class: Some(StateClass::Measurement),
        divisor: 1.0,
    },
    TemplateDef {
        label: "Total",
        field: "total",
        unit: Some("kWh"),
        device_class: Some(DeviceClass::Energy),
        state_class: Some(StateClass::TotalIncreasing),
        divisor: 1000.0,
    },
];

/// One value projected out of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectedValue {
    Number(f64),
    Timestamp(DateTime<Local>),
    /// Non-numeric, non-timestamp fields pass through untouched.
    Raw(Value),
}

/// A projectable value bound to one path into the snapshot.
#[derive(Debug)]
pub struct Sensor {
    pub name: String,
    pub unique_id: String,
    pub path: Vec<String>,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub divisor: f64,
    pub diagnostic: bool,
    /// Backs the non-decreasing policy for cumulative counters. Survives
    /// refreshes, reset only on restart.
    last_value: Mutex<Option<f64>>,
}

impl Sensor {
    fn from_static(def: &StaticDef) -> Sensor {
        Sensor {
            name: def.name.to_string(),
            unique_id: unique_id(def.name),
            path: def.path.iter().map(|key| key.to_string()).collect(),
            unit: def.unit,
            device_class: def.device_class,
            state_class: def.state_class,
            divisor: def.divisor,
            diagnostic: def.diagnostic,
            last_value: Mutex::new(None),
        }
    }

    fn from_template(sub_device: &str, def: &TemplateDef) -> Sensor {
        let name = format!("{} {} {}", DEVICE_NAME, title_case(sub_device), def.label);

        Sensor {
            unique_id: unique_id(&name),
            name,
            path: vec![
                SOLAR_READINGS_KEY.to_string(),
                sub_device.to_string(),
                def.field.to_string(),
            ],
            unit: def.unit,
            device_class: def.device_class,
            state_class: def.state_class,
            divisor: def.divisor,
            diagnostic: false,
            last_value: Mutex::new(None),
        }
    }

    /// Project this sensor's value out of `snapshot`.
    ///
    /// Missing paths and unparseable values yield `None` for this one sensor
    /// and nothing else. Cumulative totals that drop, or read zero after a
    /// nonzero prior, are treated as a source glitch: the prior value is
    /// reported instead and kept.
    pub fn read(&self, snapshot: &Snapshot) -> Option<ProjectedValue> {
        let raw = snapshot.get_path(&self.path)?;

        if self.device_class == Some(DeviceClass::Timestamp) {
            return match parse_timestamp(raw) {
                Some(timestamp) => Some(ProjectedValue::Timestamp(timestamp)),
                None => {
                    log::warn!("Error parsing timestamp {} for {}", raw, self.name);
                    None
                }
            };
        }

        if let Some(number) = raw.as_f64() {
            let value = number / self.divisor;
            let mut last = match self.last_value.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            if self.state_class == Some(StateClass::TotalIncreasing) {
                if let Some(previous) = *last {
                    if value == 0.0 && previous != 0.0 {
                        log::debug!(
                            "{}: value is 0, keeping last value {}",
                            self.name,
                            previous
                        );
                        return Some(ProjectedValue::Number(previous));
                    }
                    if value < previous {
                        log::debug!(
                            "{}: new value {} is lower than previous {}, keeping previous",
                            self.name,
                            value,
                            previous
                        );
                        return Some(ProjectedValue::Number(previous));
                    }
                }
            }

            *last = Some(value);
            return Some(ProjectedValue::Number(value));
        }

        Some(ProjectedValue::Raw(raw.clone()))
    }
}

/// Build the full sensor set: main catalog, one pair per inverter found in
/// `snapshot`, system catalog. Runs once at startup.
pub fn build_sensors(snapshot: &Snapshot) -> Vec<Sensor> {
    let mut sensors: Vec<Sensor> = MAIN_SENSORS.iter().map(Sensor::from_static).collect();

    let sub_devices = snapshot.sub_devices();
    for sub_device in &sub_devices {
        for def in INVERTER_SENSOR_TEMPLATE {
            sensors.push(Sensor::from_template(sub_device, def));
        }
    }
    if sub_devices.is_empty() {
        log::debug!("No solarReadings found in the first snapshot");
    } else {
        log::info!(
            "Created sensors for {} inverter(s): {:?}",
            sub_devices.len(),
            sub_devices
        );
    }

    sensors.extend(SYSTEM_SENSORS.iter().map(Sensor::from_static));
    sensors
}

fn unique_id(name: &str) -> String {
    format!("{}_{}", DOMAIN, name.to_lowercase().replace(' ', "_"))
}

/// Uppercase the first letter of every word, lowercase the rest. Digits and
/// punctuation count as word boundaries.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut boundary = true;

    for c in text.chars() {
        if c.is_alphabetic() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(c);
            boundary = true;
        }
    }
    out
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Local>> {
    /* Unix epoch, the encoding of system.lastApiCall. */
    if let Some(epoch) = value.as_i64() {
        return Local.timestamp_opt(epoch, 0).single();
    }
    if let Some(epoch) = value.as_f64() {
        return Local.timestamp_opt(epoch as i64, 0).single();
    }

    /* ISO-8601 with fractional seconds (the fetch stamp), then the plain
     * "YYYY-MM-DD HH:MM:SS" format of system.upSince. No zone information
     * in either, the local timezone is assumed. */
    let text = value.as_str()?;
    for format in &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Local.from_local_datetime(&naive).earliest();
        }
    }
    None
}
