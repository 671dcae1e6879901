use serde_json::{Map, Value};

/// Synthetic top-level key stamped into every snapshot at fetch time.
pub const LAST_UPDATE_KEY: &str = "_last_update";
/// Top-level key holding one reading object per connected inverter.
pub const SOLAR_READINGS_KEY: &str = "solarReadings";

pub const DEVICE_NAME: &str = "Solar Daytopper";
pub const MANUFACTURER: &str = "Solar Daytopper";
pub const DEVICE_MODEL: &str = "Solar Monitor";
/// Used when the device does not report `system.chipId`.
pub const DEFAULT_CHIP_ID: &str = "daytopper_default";

/// One fetched device payload. Immutable once produced; the coordinator
/// replaces the whole snapshot, it never patches one in place.
#[derive(Debug, Clone)]
pub struct Snapshot {
    data: Map<String, Value>,
}

impl Snapshot {
    pub fn new(data: Map<String, Value>) -> Snapshot {
        Snapshot { data }
    }

    /// Walk the payload one key at a time. A missing key anywhere along the
    /// path yields `None`, never an error.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.data.get(first.as_ref())?;
        for key in rest {
            current = current.get(key.as_ref())?;
        }
        Some(current)
    }

    /// Keys of the per-inverter reading objects, if any.
    pub fn sub_devices(&self) -> Vec<String> {
        match self.data.get(SOLAR_READINGS_KEY) {
            Some(Value::Object(readings)) => readings.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn last_update(&self) -> Option<&str> {
        self.data.get(LAST_UPDATE_KEY).and_then(Value::as_str)
    }
}

/// Identity of the monitored device, derived from the `system` section of a
/// snapshot. Groups every projected value under one logical device record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceIdentity {
    pub chip_id: String,
    pub name: &'static str,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub firmware_version: String,
    pub configuration_url: String,
}

impl DeviceIdentity {
    pub fn from_snapshot(snapshot: &Snapshot, host: &str) -> DeviceIdentity {
        let system = snapshot.get_path(&["system"]);
        let chip_id = system
            .and_then(|s| s.get("chipId"))
            .map(value_text)
            .unwrap_or_else(|| DEFAULT_CHIP_ID.to_string());
        let firmware_version = system
            .and_then(|s| s.get("firmwareVersion"))
            .map(value_text)
            .unwrap_or_else(|| "Unknown".to_string());

        DeviceIdentity {
            chip_id,
            name: DEVICE_NAME,
            manufacturer: MANUFACTURER,
            model: DEVICE_MODEL,
            firmware_version,
            configuration_url: normalize_configuration_url(host),
        }
    }
}

/// Plain text rendering of a JSON scalar (strings without quotes).
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Configuration URLs handed out to operators must carry a scheme.
pub fn normalize_configuration_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}
