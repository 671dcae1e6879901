use daytopper_rs::model::{value_text, DeviceIdentity, Snapshot};
use daytopper_rs::sensor::{DeviceClass, ProjectedValue, Sensor};
use daytopper_rs::Error;
use prometheus::{Encoder, Gauge, GaugeVec, TextEncoder};

lazy_static! {
    static ref POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "daytopper_power_watts",
            "current power production reported by the device (in W)",
        ),
        &["sensor"],
    )
    .unwrap();
    static ref ENERGY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "daytopper_energy_kwh",
            "cumulative energy production (in kWh, never decreasing)",
        ),
        &["sensor"],
    )
    .unwrap();
    static ref WIFI_STRENGTH_GAUGE: Gauge = register_gauge!(opts!(
        "daytopper_wifi_strength_dbm",
        "raw WiFi signal strength reported by the device (in dBm)",
    ))
    .unwrap();
    static ref TIMESTAMP_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "daytopper_timestamp_seconds",
            "timestamps reported by the device (as Unix epoch)",
        ),
        &["sensor"],
    )
    .unwrap();
    static ref DEVICE_INFO: GaugeVec = register_gauge_vec!(
        opts!(
            "daytopper_device_info",
            "identity of the monitored device, value is always 1",
        ),
        &["chip_id", "firmware_version", "hostname", "ip", "wifi_status"],
    )
    .unwrap();
}

/// Project every sensor against `snapshot` and feed the results to the
/// Prometheus registry. Absent values leave their series untouched.
pub fn collect(sensors: &[Sensor], snapshot: &Snapshot, device: &DeviceIdentity) {
    let mut hostname = String::new();
    let mut ip = String::new();
    let mut wifi_status = String::new();

    for sensor in sensors {
        let value = match sensor.read(snapshot) {
            Some(value) => value,
            None => continue,
        };

        match (sensor.device_class, value) {
            (Some(DeviceClass::Power), ProjectedValue::Number(watts)) => {
                POWER_GAUGE.with_label_values(&[&sensor.unique_id]).set(watts);
            }
            (Some(DeviceClass::Energy), ProjectedValue::Number(kwh)) => {
                ENERGY_GAUGE.with_label_values(&[&sensor.unique_id]).set(kwh);
            }
            (Some(DeviceClass::SignalStrength), ProjectedValue::Number(dbm)) => {
                WIFI_STRENGTH_GAUGE.set(dbm);
            }
            (Some(DeviceClass::Timestamp), ProjectedValue::Timestamp(at)) => {
                TIMESTAMP_GAUGE
                    .with_label_values(&[&sensor.unique_id])
                    .set(at.timestamp() as f64);
            }
            (None, ProjectedValue::Raw(raw)) => {
                /* Text diagnostics end up as labels on the info series. */
                match sensor.path.last().map(String::as_str) {
                    Some("wifiHostname") => hostname = value_text(&raw),
                    Some("ip") => ip = value_text(&raw),
                    Some("wifiStrength") => wifi_status = value_text(&raw),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /* Drop any stale label combination before publishing the current one. */
    DEVICE_INFO.reset();
    DEVICE_INFO
        .with_label_values(&[
            &device.chip_id,
            &device.firmware_version,
            &hostname,
            &ip,
            &wifi_status,
        ])
        .set(1.0);
}

/// Read metrics from the Prometheus registry.
pub fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::Format))?;
    String::from_utf8(buffer).or(Err(Error::Format))
}
