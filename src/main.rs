//! Single-shot poller for Nest thermostats: refreshes an OAuth2 token,
//! lists the enterprise's devices, normalizes each thermostat's traits into
//! one CSV row and appends it to that device's log, pruning entries older
//! than the retention window. Meant to be run on a cadence by an external
//! scheduler; recoverable failures are logged and the process exits cleanly.

mod client;
mod config;
mod extract;
mod store;
mod weather;

use crate::client::SdmClient;
use crate::config::Config;
use crate::weather::{StationCache, WeatherClient};
use chrono::Utc;
use log::{error, info, warn};
use std::ffi::OsString;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, PartialEq)]
struct CliArgs {
    config: PathBuf,
    log_level: String,
    log_file: Option<PathBuf>,
}

fn parse_args<I>(mut args: I) -> Result<CliArgs, String>
where
    I: Iterator<Item = OsString>,
{
    let mut config: Option<PathBuf> = None;
    let mut log_level: Option<String> = None;
    let mut log_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        let Some(arg) = arg.to_str() else {
            return Err("argument contains invalid UTF-8".to_string());
        };
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag, Some(value.to_string())),
            None => (arg, None),
        };
        match flag {
            "--config" => {
                if config.is_some() {
                    return Err("`--config` provided more than once".to_string());
                }
                config = Some(PathBuf::from(flag_value(flag, inline, &mut args)?));
            }
            "--log-level" => {
                if log_level.is_some() {
                    return Err("`--log-level` provided more than once".to_string());
                }
                log_level = Some(flag_value(flag, inline, &mut args)?);
            }
            "--log-file" => {
                if log_file.is_some() {
                    return Err("`--log-file` provided more than once".to_string());
                }
                log_file = Some(PathBuf::from(flag_value(flag, inline, &mut args)?));
            }
            "--" => break,
            other => return Err(format!("unrecognised argument: {}", other)),
        }
    }

    Ok(CliArgs {
        config: config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        log_level: log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        log_file,
    })
}

fn flag_value<I>(flag: &str, inline: Option<String>, args: &mut I) -> Result<String, String>
where
    I: Iterator<Item = OsString>,
{
    if let Some(value) = inline {
        if value.is_empty() {
            return Err(format!("`{}` requires a value", flag));
        }
        return Ok(value);
    }
    match args.next() {
        Some(value) => value
            .into_string()
            .map_err(|_| "argument contains invalid UTF-8".to_string()),
        None => Err(format!("`{}` requires a value", flag)),
    }
}

fn init_logging(cli: &CliArgs) -> Result<(), String> {
    let level = cli
        .log_level
        .parse::<log::LevelFilter>()
        .map_err(|_| format!("invalid log level: {}", cli.log_level))?;

    let default_filter = env_logger::Env::default().default_filter_or(level.to_string());
    let mut builder = env_logger::Builder::from_env(default_filter);
    builder.format_timestamp_secs();
    if let Some(path) = &cli.log_file {
        // Overwritten each run; the interesting history lives in the CSVs.
        let file = std::fs::File::create(path)
            .map_err(|e| format!("cannot open log file {}: {}", path.display(), e))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn run(cli: &CliArgs) -> Result<(), String> {
    // 1) Load and validate config
    let cfg = Config::load(&cli.config).map_err(|e| e.to_string())?;
    info!(
        "Config loaded (output_dir={}, scale={:?}, timezone={}, weather_enrichment={})",
        cfg.output_dir.display(),
        cfg.temperature_scale,
        cfg.timezone,
        cfg.weather.is_some()
    );

    // 2) Exchange the refresh token for a bearer token
    let client = SdmClient::new();
    let access_token = client.refresh_access_token(&cfg).map_err(|e| e.to_string())?;
    info!("Authenticated to the SDM API");

    // 3) Fetch the raw device list; nothing is written if this fails
    let devices = client.fetch_devices(&cfg, &access_token).map_err(|e| e.to_string())?;

    // 4) Outdoor temperature, shared by every row of this poll
    let outdoor_temperature = cfg.weather.as_ref().and_then(|weather| {
        let weather_client = WeatherClient::new();
        let mut stations = StationCache::new();
        weather_client.outdoor_temperature(weather, &mut stations)
    });

    // 5) Normalize thermostat traits into rows
    let local_now = Utc::now().with_timezone(&cfg.timezone);
    let rows = extract::extract_rows(&devices, &cfg, local_now, outdoor_temperature);
    if rows.is_empty() {
        warn!("No thermostat devices found");
        return Ok(());
    }

    // 6) Append and prune, per device
    let written = store::write_rows(&rows, &cfg, local_now.date_naive()).map_err(|e| e.to_string())?;
    info!("Poll complete: {}/{} device log(s) updated", written, rows.len());
    Ok(())
}

fn main() {
    let cli = match parse_args(std::env::args_os().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = init_logging(&cli) {
        eprintln!("fatal: {}", err);
        std::process::exit(1);
    }

    info!(
        "nest-csvlog {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    // Recoverable poll failures are logged, not raised to the shell; the
    // external scheduler simply tries again on its next cadence.
    if let Err(e) = run(&cli) {
        error!("poll failed: {}", e);
    }
}
