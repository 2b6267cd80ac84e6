//! Output formatting and persistence for sensor states.
//!
//! Supports pretty-printing, JSON serialization, a JSON state file and CSV
//! history append.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::sensor::SensorState;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// One CSV history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorReading {
    pub timestamp: String,
    pub device_id: String,
    pub sensor: String,
    pub value: Option<i64>,
    pub status: Option<String>,
}

impl SensorReading {
    pub fn from_state(state: &SensorState, now: &DateTime<Tz>) -> Self {
        Self {
            timestamp: now.to_rfc3339(),
            device_id: state.device_id.clone(),
            sensor: state.kind.key().to_string(),
            value: state.value,
            status: state
                .attributes
                .as_ref()
                .and_then(|a| a.status)
                .map(|s| s.as_str().to_string()),
        }
    }
}

/// Logs sensor states using Rust's debug pretty-print format.
pub fn print_pretty(states: &[SensorState]) {
    debug!("{:#?}", states);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Overwrites `path` with the current sensor states.
pub fn write_state(path: impl AsRef<Path>, states: &[SensorState]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(states)?)?;
    Ok(())
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: impl AsRef<Path>, record: &impl Serialize) -> Result<()> {
    let path = path.as_ref();
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}
