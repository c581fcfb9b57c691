//! Poller configuration loaded from a JSON file.
//! Validation aggregates missing fields so a bad config fails with one message.

use chrono_tz::Tz;
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::{fs, io};

pub const DEFAULT_OUTPUT_DIR: &str = "logs";
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

const REQUIRED_FIELDS: [&str; 4] = ["project_id", "client_id", "client_secret", "refresh_token"];
const REQUIRED_WEATHER_FIELDS: [&str; 3] = ["latitude", "longitude", "user_agent"];

#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(PathBuf, io::Error),
    /// The config file is not valid JSON.
    Json(PathBuf, serde_json::Error),
    /// The document parsed but one or more fields are missing or invalid.
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read config file {}: {}", path.display(), e),
            ConfigError::Json(path, e) => write!(f, "invalid JSON in config file {}: {}", path.display(), e),
            ConfigError::Invalid(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Json(_, e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TemperatureScale {
    Fahrenheit,
    Celsius,
}

impl TemperatureScale {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fahrenheit" => Some(TemperatureScale::Fahrenheit),
            "celsius" => Some(TemperatureScale::Celsius),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// Identifying User-Agent string required by api.weather.gov.
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Directory holding one CSV log per device.
    pub output_dir: PathBuf,
    pub temperature_scale: TemperatureScale,
    pub timezone: Tz,
    /// Optional outdoor-temperature enrichment; absent means no enrichment.
    pub weather: Option<WeatherConfig>,
}

impl Config {
    /// Read and validate the config file. Relative `output_dir` values are
    /// resolved against the config file's own directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let data: Value = serde_json::from_str(&raw).map_err(|e| ConfigError::Json(path.to_path_buf(), e))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_value(&data, base_dir)
    }

    pub fn from_value(data: &Value, base_dir: &Path) -> Result<Self, ConfigError> {
        let missing = REQUIRED_FIELDS
            .iter()
            .filter(|field| non_empty_str(data.get(**field)).is_none())
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "config missing required fields: {}",
                missing.join(", ")
            )));
        }

        let output_dir = PathBuf::from(non_empty_str(data.get("output_dir")).unwrap_or(DEFAULT_OUTPUT_DIR));
        let output_dir = if output_dir.is_absolute() {
            output_dir
        } else {
            base_dir.join(output_dir)
        };

        let temperature_scale = match data.get("temperature_scale") {
            None | Some(Value::Null) => TemperatureScale::Fahrenheit,
            Some(v) => v.as_str().and_then(TemperatureScale::parse).ok_or_else(|| {
                ConfigError::Invalid("temperature_scale must be either 'fahrenheit' or 'celsius'".to_string())
            })?,
        };

        let timezone_name = non_empty_str(data.get("timezone")).unwrap_or(DEFAULT_TIMEZONE);
        let timezone = timezone_name
            .parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("invalid timezone in config: {}", timezone_name)))?;

        let weather = match data.get("weather") {
            None | Some(Value::Null) => None,
            Some(weather_data) => Some(parse_weather(weather_data)?),
        };

        Ok(Config {
            project_id: non_empty_str(data.get("project_id")).unwrap().to_string(),
            client_id: non_empty_str(data.get("client_id")).unwrap().to_string(),
            client_secret: non_empty_str(data.get("client_secret")).unwrap().to_string(),
            refresh_token: non_empty_str(data.get("refresh_token")).unwrap().to_string(),
            output_dir,
            temperature_scale,
            timezone,
            weather,
        })
    }
}

fn parse_weather(data: &Value) -> Result<WeatherConfig, ConfigError> {
    let missing = REQUIRED_WEATHER_FIELDS
        .iter()
        .filter(|field| data.get(**field).is_none())
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "weather config missing required fields: {}",
            missing.join(", ")
        )));
    }

    let latitude = coordinate(&data["latitude"])
        .ok_or_else(|| ConfigError::Invalid("weather latitude/longitude must be numeric".to_string()))?;
    let longitude = coordinate(&data["longitude"])
        .ok_or_else(|| ConfigError::Invalid("weather latitude/longitude must be numeric".to_string()))?;
    let user_agent = non_empty_str(data.get("user_agent"))
        .ok_or_else(|| ConfigError::Invalid("weather user_agent must be a non-empty string".to_string()))?
        .to_string();

    Ok(WeatherConfig {
        latitude,
        longitude,
        user_agent,
    })
}

// Coordinates may arrive as JSON numbers or numeric strings.
fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}
