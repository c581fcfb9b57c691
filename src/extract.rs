//! Turns raw SDM device records into normalized per-device rows.
//!
//! Device payloads are deeply nested and loosely typed, so reads go through
//! a path accessor over `serde_json::Value` that yields `None` at any
//! missing level instead of failing deserialization.

use crate::config::{Config, TemperatureScale};
use chrono::DateTime;
use chrono_tz::Tz;
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;

/// Exact (case-sensitive) suffix marking a thermostat-type device.
const THERMOSTAT_TYPE_SUFFIX: &str = "THERMOSTAT";
/// Name used when a device carries no usable display name at all.
const FALLBACK_DEVICE_NAME: &str = "thermostat";

const TRAIT_INFO: &str = "sdm.devices.traits.Info";
const TRAIT_TEMPERATURE: &str = "sdm.devices.traits.Temperature";
const TRAIT_HUMIDITY: &str = "sdm.devices.traits.Humidity";
const TRAIT_SETPOINT: &str = "sdm.devices.traits.ThermostatTemperatureSetpoint";
const TRAIT_HVAC: &str = "sdm.devices.traits.ThermostatHvac";

/// HVAC status reported when the trait is absent from the payload.
const HVAC_STATUS_OFF: &str = "OFF";

/// One normalized observation for a single thermostat.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRow {
    pub date: String,
    pub time: String,
    /// Full precision in the configured unit; setpoints are rounded instead.
    pub ambient_temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub heat_setpoint: Option<f64>,
    pub cool_setpoint: Option<f64>,
    pub hvac_status: String,
    /// Always Fahrenheit, one decimal; absent unless enrichment succeeded.
    pub outdoor_temperature: Option<f64>,
}

/// Build one row per thermostat device, keyed by sanitized display name.
///
/// All rows of one invocation share the same timestamp and the same outdoor
/// temperature. Two devices sanitizing to the same identifier collapse to
/// the later one.
pub fn extract_rows(
    devices: &[Value],
    config: &Config,
    local_now: DateTime<Tz>,
    outdoor_temperature: Option<f64>,
) -> BTreeMap<String, DeviceRow> {
    let mut rows = BTreeMap::new();
    let date = local_now.format("%Y-%m-%d").to_string();
    let time = local_now.format("%H:%M").to_string();

    for device in devices {
        let device_type = device.get("type").and_then(Value::as_str).unwrap_or("");
        if !device_type.ends_with(THERMOSTAT_TYPE_SUFFIX) {
            continue;
        }

        let readable_name = resolve_name(device);
        let traits = &device["traits"];

        let ambient_c = value_at(traits, &[TRAIT_TEMPERATURE, "ambientTemperatureCelsius"]).and_then(Value::as_f64);
        let humidity = value_at(traits, &[TRAIT_HUMIDITY, "ambientHumidityPercent"]).and_then(Value::as_f64);
        let heat_c = value_at(traits, &[TRAIT_SETPOINT, "heatCelsius"]).and_then(Value::as_f64);
        let cool_c = value_at(traits, &[TRAIT_SETPOINT, "coolCelsius"]).and_then(Value::as_f64);
        let hvac_status = value_at(traits, &[TRAIT_HVAC, "status"])
            .and_then(Value::as_str)
            .unwrap_or(HVAC_STATUS_OFF);

        let row = DeviceRow {
            date: date.clone(),
            time: time.clone(),
            ambient_temperature: ambient_c.map(|c| to_scale(c, config.temperature_scale)),
            humidity,
            heat_setpoint: heat_c.map(|c| to_scale(c, config.temperature_scale).round()),
            cool_setpoint: cool_c.map(|c| to_scale(c, config.temperature_scale).round()),
            hvac_status: hvac_status.to_string(),
            outdoor_temperature,
        };

        debug!("Prepared row for device '{}': {:?}", readable_name, row);
        let key = sanitize_name(&readable_name);
        if rows.insert(key.clone(), row).is_some() {
            warn!(
                "Multiple devices sanitize to '{}'; keeping the last one processed",
                key
            );
        }
    }

    rows
}

/// Human-readable name: custom name, else the first parent-relation display
/// name, else the tail of the resource identifier, else a fixed fallback.
fn resolve_name(device: &Value) -> String {
    if let Some(custom) = value_at(&device["traits"], &[TRAIT_INFO, "customName"])
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        return custom.to_string();
    }

    if let Some(parents) = device.get("parentRelations").and_then(Value::as_array) {
        for relation in parents {
            if let Some(display) = relation
                .get("displayName")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
            {
                return display.to_string();
            }
        }
    }

    device
        .get("name")
        .and_then(Value::as_str)
        .and_then(|name| name.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_DEVICE_NAME)
        .to_string()
}

/// Descend `path` one key at a time; `None` as soon as a level is missing
/// or not an object.
pub fn value_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

/// Lowercase, underscore-joined, filesystem-safe identifier.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { '_' })
        .collect();
    replaced
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

fn to_scale(celsius: f64, scale: TemperatureScale) -> f64 {
    match scale {
        TemperatureScale::Celsius => celsius,
        TemperatureScale::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::path::Path;

    fn config_with_scale(scale: &str) -> Config {
        Config::from_value(
            &json!({
                "project_id": "p",
                "client_id": "c",
                "client_secret": "s",
                "refresh_token": "r",
                "temperature_scale": scale
            }),
            Path::new("."),
        )
        .unwrap()
    }

    fn poll_instant() -> DateTime<Tz> {
        chrono_tz::America::New_York
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 0)
            .unwrap()
    }

    fn load_fixture() -> Vec<Value> {
        let raw = std::fs::read_to_string("tests/data/devices.json").expect("fixture present");
        let payload: Value = serde_json::from_str(&raw).expect("parse device list");
        payload["devices"].as_array().expect("devices array").clone()
    }

    #[test]
    fn sanitizes_punctuation_to_underscores() {
        assert_eq!(sanitize_name("Living Room #2!"), "living_room_2");
    }

    #[test]
    fn sanitizes_empty_and_punctuation_only_to_empty() {
        assert_eq!(sanitize_name(""), "");
        assert_eq!(sanitize_name("!!! ---"), "");
    }

    #[test]
    fn celsius_passes_through_and_fahrenheit_converts() {
        assert_eq!(to_scale(21.5, TemperatureScale::Celsius), 21.5);
        assert_eq!(to_scale(21.5, TemperatureScale::Fahrenheit), 70.7);
        assert_eq!(to_scale(0.0, TemperatureScale::Fahrenheit), 32.0);
    }

    #[test]
    fn value_at_returns_none_for_any_missing_level() {
        let v = json!({"a": {"b": {"c": 1}}});
        assert_eq!(value_at(&v, &["a", "b", "c"]), Some(&json!(1)));
        assert!(value_at(&v, &["a", "x", "c"]).is_none());
        assert!(value_at(&v, &["a", "b", "c", "d"]).is_none());
    }

    #[test]
    fn skips_non_thermostat_devices() {
        let devices = load_fixture();
        let rows = extract_rows(&devices, &config_with_scale("celsius"), poll_instant(), None);
        // The fixture holds two thermostats and one camera.
        assert_eq!(rows.len(), 2);
        assert!(!rows.contains_key("front_door"));
    }

    #[test]
    fn extracts_traits_with_celsius_passthrough() {
        let devices = load_fixture();
        let rows = extract_rows(&devices, &config_with_scale("celsius"), poll_instant(), None);
        let row = &rows["upstairs"];
        assert_eq!(row.ambient_temperature, Some(21.5));
        assert_eq!(row.humidity, Some(42.0));
        assert_eq!(row.heat_setpoint, Some(20.0));
        assert_eq!(row.cool_setpoint, None);
        assert_eq!(row.hvac_status, "HEATING");
        assert_eq!(row.date, "2024-03-09");
        assert_eq!(row.time, "14:05");
    }

    #[test]
    fn converts_to_fahrenheit_rounding_setpoints_only() {
        let devices = load_fixture();
        let rows = extract_rows(&devices, &config_with_scale("fahrenheit"), poll_instant(), None);
        let row = &rows["upstairs"];
        assert_eq!(row.ambient_temperature, Some(70.7));
        // 20C -> 68F exactly; 22.5C -> 72.5F rounds to 73 on the basement unit.
        assert_eq!(row.heat_setpoint, Some(68.0));
        assert_eq!(rows["den"].heat_setpoint, Some(73.0));
    }

    #[test]
    fn missing_traits_become_absent_fields_and_hvac_defaults_off() {
        let devices = vec![json!({
            "name": "enterprises/p/devices/bare",
            "type": "sdm.devices.types.THERMOSTAT"
        })];
        let rows = extract_rows(&devices, &config_with_scale("fahrenheit"), poll_instant(), None);
        let row = &rows["bare"];
        assert_eq!(row.ambient_temperature, None);
        assert_eq!(row.humidity, None);
        assert_eq!(row.heat_setpoint, None);
        assert_eq!(row.hvac_status, "OFF");
    }

    #[test]
    fn name_resolution_falls_back_in_priority_order() {
        let with_parent = json!({
            "name": "enterprises/p/devices/abc",
            "type": "sdm.devices.types.THERMOSTAT",
            "traits": {TRAIT_INFO: {"customName": ""}},
            "parentRelations": [{"parent": "rooms/1"}, {"parent": "rooms/2", "displayName": "Guest Room"}]
        });
        assert_eq!(resolve_name(&with_parent), "Guest Room");

        let bare = json!({
            "name": "enterprises/p/devices/abc",
            "type": "sdm.devices.types.THERMOSTAT"
        });
        assert_eq!(resolve_name(&bare), "abc");

        let nameless = json!({"type": "sdm.devices.types.THERMOSTAT"});
        assert_eq!(resolve_name(&nameless), "thermostat");
    }

    #[test]
    fn colliding_identifiers_keep_last_device() {
        let devices = vec![
            json!({
                "type": "sdm.devices.types.THERMOSTAT",
                "traits": {
                    TRAIT_INFO: {"customName": "Hallway!"},
                    TRAIT_TEMPERATURE: {"ambientTemperatureCelsius": 18.0}
                }
            }),
            json!({
                "type": "sdm.devices.types.THERMOSTAT",
                "traits": {
                    TRAIT_INFO: {"customName": "hallway"},
                    TRAIT_TEMPERATURE: {"ambientTemperatureCelsius": 23.0}
                }
            }),
        ];
        let rows = extract_rows(&devices, &config_with_scale("celsius"), poll_instant(), None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows["hallway"].ambient_temperature, Some(23.0));
    }

    #[test]
    fn outdoor_temperature_attached_to_every_row() {
        let devices = load_fixture();
        let rows = extract_rows(&devices, &config_with_scale("celsius"), poll_instant(), Some(48.3));
        assert!(rows.values().all(|r| r.outdoor_temperature == Some(48.3)));
    }
}
