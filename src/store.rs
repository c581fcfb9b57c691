//! Append-and-prune CSV log store: one file per device, append-only except
//! for retention rewrites.
//!
//! Rows older than the retention window are dropped on every run; a row
//! whose date cannot be parsed is of unknown age and is kept. The file is
//! rewritten only when the prune actually dropped something, so an
//! untouched log stays byte-identical.

use crate::config::Config;
use crate::extract::DeviceRow;
use chrono::NaiveDate;
use log::{error, info};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 8] = [
    "Date",
    "Time (ET)",
    "Temperature at Thermostat or Sensor",
    "Humidity",
    "Heat Setpoint",
    "Cool Setpoint",
    "HVAC Status",
    "Outdoor Temperature",
];

/// Rows older than this many days are eligible for pruning.
pub const RETENTION_DAYS: i64 = 730;

/// Column renames applied to historical rows before schema normalization,
/// oldest first.
const LEGACY_RENAMES: [(&str, &str); 1] = [("Het Stpoint", "Heat Setpoint")];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug)]
pub enum StoreError {
    Io(PathBuf, io::Error),
    Csv(PathBuf, csv::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(path, e) => write!(f, "io error on {}: {}", path.display(), e),
            StoreError::Csv(path, e) => write!(f, "csv error on {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(_, e) => Some(e),
            StoreError::Csv(_, e) => Some(e),
        }
    }
}

/// Append one row per device and prune each touched log.
///
/// A failure on one device's file is logged and does not stop the others;
/// only a failure to create the output directory is fatal. Returns the
/// number of device logs successfully updated.
pub fn write_rows(
    rows: &BTreeMap<String, DeviceRow>,
    config: &Config,
    today: NaiveDate,
) -> Result<usize, StoreError> {
    fs::create_dir_all(&config.output_dir)
        .map_err(|e| StoreError::Io(config.output_dir.clone(), e))?;

    let mut written = 0;
    for (device_id, row) in rows {
        let path = config.output_dir.join(format!("{}.csv", device_id));
        match log_device(&path, row, today) {
            Ok(()) => {
                written += 1;
                info!("Logged data for {} to {}", device_id, path.display());
            }
            Err(e) => error!("Failed to update log for '{}': {}", device_id, e),
        }
    }
    Ok(written)
}

fn log_device(path: &Path, row: &DeviceRow, today: NaiveDate) -> Result<(), StoreError> {
    append_row(path, row)?;
    prune_log(path, RETENTION_DAYS, today)?;
    Ok(())
}

/// Append a single row, writing the header first when the file is new or
/// empty.
pub fn append_row(path: &Path, row: &DeviceRow) -> Result<(), StoreError> {
    let io_err = |e| StoreError::Io(path.to_path_buf(), e);
    let csv_err = |e| StoreError::Csv(path.to_path_buf(), e);

    let file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
    let write_header = file.metadata().map_err(io_err)?.len() == 0;

    let mut writer = csv::WriterBuilder::new().from_writer(file);
    if write_header {
        writer.write_record(HEADER).map_err(csv_err)?;
    }
    writer.write_record(&record_for(row)).map_err(csv_err)?;
    writer.flush().map_err(io_err)
}

/// Drop rows dated before `today - retention_days`, keeping any row whose
/// date does not parse. Rewrites the file only when something was dropped.
/// Returns the number of rows removed.
pub fn prune_log(path: &Path, retention_days: i64, today: NaiveDate) -> Result<usize, StoreError> {
    if retention_days <= 0 || !path.exists() {
        return Ok(0);
    }
    let csv_err = |e| StoreError::Csv(path.to_path_buf(), e);
    let cutoff = today - chrono::Duration::days(retention_days);

    // Historical rows may predate column renames or have short records, so
    // read them as header-keyed maps rather than positionally.
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path).map_err(csv_err)?;
    let file_header = reader.headers().map_err(csv_err)?.clone();

    let mut total = 0usize;
    let mut kept: Vec<BTreeMap<String, String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        total += 1;

        let mut row: BTreeMap<String, String> = file_header
            .iter()
            .zip(record.iter())
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        migrate_legacy_fields(&mut row);

        let keep = match row.get("Date") {
            Some(date) => match NaiveDate::parse_from_str(date, DATE_FORMAT) {
                Ok(parsed) => parsed >= cutoff,
                // Unknown age; must not be silently lost.
                Err(_) => true,
            },
            None => true,
        };
        if keep {
            kept.push(row);
        }
    }

    let dropped = total - kept.len();
    if dropped == 0 {
        return Ok(0);
    }

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(HEADER).map_err(csv_err)?;
    for row in &kept {
        writer
            .write_record(HEADER.iter().map(|key| row.get(*key).map(String::as_str).unwrap_or("")))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| StoreError::Io(path.to_path_buf(), e))?;

    info!("Pruned {} row(s) older than {} from {}", dropped, cutoff, path.display());
    Ok(dropped)
}

fn migrate_legacy_fields(row: &mut BTreeMap<String, String>) {
    for (old, new) in LEGACY_RENAMES {
        if !row.contains_key(new) {
            if let Some(value) = row.remove(old) {
                row.insert(new.to_string(), value);
            }
        }
    }
}

fn record_for(row: &DeviceRow) -> [String; 8] {
    [
        row.date.clone(),
        row.time.clone(),
        number_field(row.ambient_temperature),
        number_field(row.humidity),
        number_field(row.heat_setpoint),
        number_field(row.cool_setpoint),
        row.hvac_status.clone(),
        number_field(row.outdoor_temperature),
    ]
}

// Shortest round-trip formatting: 21.5 stays "21.5", 68.0 becomes "68".
fn number_field(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{}", v),
        None => String::new(),
    }
}
