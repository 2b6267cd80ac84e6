//! Persisted tracker configuration.
//!
//! Stored as a pretty-printed JSON object on disk:
//! ```json
//! {
//!   "scan_interval_secs": 60,
//!   "devices": [
//!     {
//!       "halte_number": "101000",
//!       "line_number": "5",
//!       "scheduled_time": "2024-03-11T08:15:00+01:00",
//!       "destination": "Linkeroever",
//!       "unique_id": "101000_5_08:15"
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, TrackerError};
use crate::schedule::target_time_of;

pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOOKAHEAD_DAYS: u32 = 7;

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_update_timeout() -> u64 {
    DEFAULT_UPDATE_TIMEOUT_SECS
}

fn default_lookahead_days() -> u32 {
    DEFAULT_LOOKAHEAD_DAYS
}

fn default_vehicle_type() -> String {
    "Bus".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Subscription key; `DELIJN_API_KEY` overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_update_timeout")]
    pub update_timeout_secs: u64,
    /// How many days ahead to look for the next run of a tracked departure.
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u32,
    #[serde(default)]
    pub devices: Vec<TrackedDevice>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            update_timeout_secs: DEFAULT_UPDATE_TIMEOUT_SECS,
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            devices: Vec::new(),
        }
    }
}

/// One tracked departure: a line at a halte at a fixed time of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedDevice {
    pub halte_number: String,
    pub line_number: String,
    /// Timestamp of the departure picked during setup; only its time of day
    /// is tracked afterwards.
    pub scheduled_time: String,
    pub destination: String,
    #[serde(default)]
    pub public_line: Option<String>,
    #[serde(default = "default_vehicle_type")]
    pub vehicle_type: String,
    #[serde(default)]
    pub line_description: Option<String>,
    #[serde(default)]
    pub entity_number: Option<String>,
    #[serde(default)]
    pub halte_name: String,
    #[serde(default)]
    pub ritnummer: Option<String>,
    #[serde(default)]
    pub unique_id: Option<String>,
}

impl TrackedDevice {
    /// `HH:MM` this device tracks.
    pub fn target_time(&self) -> Result<String> {
        target_time_of(&self.scheduled_time)
    }

    /// `{halte}_{line}_{HH:MM}`, falling back to the raw time if unparsable.
    pub fn device_id(&self) -> String {
        if let Some(id) = &self.unique_id {
            return id.clone();
        }
        let time = self
            .target_time()
            .unwrap_or_else(|_| self.scheduled_time.clone());
        format!("{}_{}_{}", self.halte_number, self.line_number, time)
    }

    pub fn public_line(&self) -> &str {
        self.public_line.as_deref().unwrap_or(&self.line_number)
    }

    /// Label shown when offering the device for removal.
    pub fn option_label(&self) -> String {
        let time = self
            .target_time()
            .unwrap_or_else(|_| self.scheduled_time.clone());
        format!(
            "Halte {} - Line {} - {} - {}",
            self.halte_number, self.line_number, self.destination, time
        )
    }
}

impl TrackerConfig {
    /// Loads the config from a JSON file at `path`; a missing file yields the
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "Config file missing, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), devices = self.devices.len(), "Config saved");
        Ok(())
    }

    /// Environment key first, then the stored one.
    pub fn resolve_api_key(&self, env_key: Option<String>) -> Option<String> {
        env_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }

    pub fn add_device(&mut self, device: TrackedDevice) -> Result<()> {
        let unique_id = device.device_id();
        if self.devices.iter().any(|d| d.device_id() == unique_id) {
            return Err(TrackerError::DuplicateDevice { unique_id });
        }
        info!(device = %unique_id, "Adding device");
        self.devices.push(device);
        Ok(())
    }

    pub fn remove_device(&mut self, unique_id: &str) -> Result<TrackedDevice> {
        let pos = self
            .devices
            .iter()
            .position(|d| d.device_id() == unique_id)
            .ok_or_else(|| TrackerError::DeviceNotFound {
                unique_id: unique_id.to_string(),
            })?;

        let removed = self.devices.remove(pos);
        info!(
            halte = %removed.halte_number,
            line = %removed.line_number,
            time = %removed.target_time().unwrap_or_default(),
            "Removing device"
        );
        Ok(removed)
    }
}
