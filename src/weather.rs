//! Outdoor-temperature enrichment via api.weather.gov.
//!
//! Station resolution is a two-step lookup (point -> station list, first
//! station wins) and rarely changes, so results are memoized per
//! (latitude, longitude, user-agent) for the lifetime of the process.
//! Every failure here degrades to "no outdoor temperature"; it never
//! aborts a poll.

use crate::config::WeatherConfig;
use log::warn;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const NWS_BASE_URL: &str = "https://api.weather.gov";
const NWS_TIMEOUT: Duration = Duration::from_secs(12);
/// Response bodies are truncated to this many bytes in warnings.
const WARN_BODY_LIMIT: usize = 200;

/// Cache key; coordinates are compared bit-exactly since they come from the
/// same config for the whole process run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StationKey {
    latitude_bits: u64,
    longitude_bits: u64,
    user_agent: String,
}

impl StationKey {
    fn for_config(weather: &WeatherConfig) -> Self {
        StationKey {
            latitude_bits: weather.latitude.to_bits(),
            longitude_bits: weather.longitude.to_bits(),
            user_agent: weather.user_agent.clone(),
        }
    }
}

/// Memoized station lookups, failed resolutions included. Constructed once
/// per process run by the caller.
#[derive(Debug, Default)]
pub struct StationCache {
    entries: BTreeMap<StationKey, Option<String>>,
}

impl StationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct WeatherClient {
    agent: ureq::Agent,
    base_url: String,
}

impl Default for WeatherClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WeatherClient {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new().timeout(NWS_TIMEOUT).build();
        WeatherClient {
            agent,
            base_url: NWS_BASE_URL.to_string(),
        }
    }

    /// Latest observation at the nearest station, in Fahrenheit rounded to
    /// one decimal. `None` on any failure along the way.
    pub fn outdoor_temperature(&self, weather: &WeatherConfig, cache: &mut StationCache) -> Option<f64> {
        let station_url = self.resolve_station(weather, cache)?;

        let payload = self.get_json(
            &format!("{}/observations/latest", station_url),
            &weather.user_agent,
            "latest observation",
        )?;
        let temp_c = crate::extract::value_at(&payload, &["properties", "temperature", "value"]).and_then(Value::as_f64);
        let Some(temp_c) = temp_c else {
            warn!("weather.gov observation has no temperature value");
            return None;
        };
        Some(((temp_c * 9.0 / 5.0 + 32.0) * 10.0).round() / 10.0)
    }

    fn resolve_station(&self, weather: &WeatherConfig, cache: &mut StationCache) -> Option<String> {
        let key = StationKey::for_config(weather);
        if let Some(cached) = cache.entries.get(&key) {
            return cached.clone();
        }
        let resolved = self.lookup_station(weather);
        cache.entries.insert(key, resolved.clone());
        resolved
    }

    fn lookup_station(&self, weather: &WeatherConfig) -> Option<String> {
        let points_url = format!("{}/points/{},{}", self.base_url, weather.latitude, weather.longitude);
        let point = self.get_json(&points_url, &weather.user_agent, "points lookup")?;
        let Some(stations_url) = crate::extract::value_at(&point, &["properties", "observationStations"])
            .and_then(Value::as_str)
        else {
            warn!("weather.gov response missing observationStations URL");
            return None;
        };

        let stations = self.get_json(stations_url, &weather.user_agent, "stations lookup")?;
        let first = stations
            .get("features")
            .and_then(Value::as_array)
            .and_then(|features| features.first());
        let Some(station_url) = first.and_then(|f| f.get("id")).and_then(Value::as_str) else {
            warn!("weather.gov returned no observation stations for coordinates");
            return None;
        };
        Some(station_url.to_string())
    }

    /// GET a geo+json document; warns and returns `None` on any failure.
    fn get_json(&self, url: &str, user_agent: &str, what: &str) -> Option<Value> {
        let resp = self
            .agent
            .get(url)
            .set("User-Agent", user_agent)
            .set("Accept", "application/geo+json")
            .call();

        match resp {
            Ok(r) => match serde_json::from_reader(r.into_reader()) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("weather.gov {} returned malformed JSON: {}", what, e);
                    None
                }
            },
            Err(ureq::Error::Status(status, r)) => {
                let body = r.into_string().unwrap_or_else(|_| String::from("<no body>"));
                warn!("weather.gov {} failed ({}): {}", what, status, truncate(&body, WARN_BODY_LIMIT));
                None
            }
            Err(ureq::Error::Transport(t)) => {
                warn!("weather.gov {} failed: {}", what, t);
                None
            }
        }
    }
}

fn truncate(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
