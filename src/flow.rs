//! Setup flow for tracked departures.
//!
//! Mirrors the steps a user goes through: validate the API key, pick a halte,
//! pick one of its lines, then pick one of that line's departure times. The
//! final step yields a [`TrackedDevice`] ready to be stored.

use chrono::NaiveDate;
use tracing::{debug, error, warn};

use crate::config::{TrackedDevice, TrackerConfig};
use crate::error::{Result, TrackerError};
use crate::schedule::target_time_of;
use crate::services::transit_api::{LineInfo, ScheduleQuery, ScheduledDeparture, TransitApi};

pub const KEEP_ALL_OPTION: &str = "none";

pub struct SetupFlow<'a, A> {
    api: &'a A,
    halte_number: Option<String>,
    available_lines: Vec<LineInfo>,
    selected_line: Option<LineInfo>,
    available_times: Vec<ScheduledDeparture>,
}

impl<'a, A: TransitApi> SetupFlow<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            halte_number: None,
            available_lines: Vec::new(),
            selected_line: None,
            available_times: Vec::new(),
        }
    }

    pub async fn validate_api_key(&self) -> Result<()> {
        self.api
            .validate_api_key()
            .await
            .inspect_err(|e| error!(error = %e, "Failed to connect to De Lijn API"))
    }

    /// Loads the lines served at `halte`.
    pub async fn select_halte(&mut self, halte: &str) -> Result<&[LineInfo]> {
        let lines = self
            .api
            .available_lines(halte)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to get available lines"))?;

        if lines.is_empty() {
            return Err(TrackerError::NoLines {
                halte: halte.to_string(),
            });
        }

        self.halte_number = Some(halte.to_string());
        self.available_lines = lines;
        self.selected_line = None;
        self.available_times.clear();
        Ok(&self.available_lines)
    }

    /// `(lijnnummer, label)` pairs for the loaded lines.
    pub fn line_options(&self) -> Vec<(String, String)> {
        self.available_lines
            .iter()
            .map(|l| (l.lijnnummer.clone(), l.option_label()))
            .collect()
    }

    /// Picks a line and loads its departures on `date` (today when `None`).
    pub async fn select_line(
        &mut self,
        line: &str,
        date: Option<NaiveDate>,
    ) -> Result<&[ScheduledDeparture]> {
        let halte = self
            .halte_number
            .clone()
            .ok_or(TrackerError::FlowOrder {
                step: "select_line",
            })?;

        let selected = self
            .available_lines
            .iter()
            .find(|l| l.lijnnummer == line)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownLine {
                line: line.to_string(),
            })?;

        debug!(halte = %halte, line, ?date, "Getting schedule times");
        let query = ScheduleQuery::new(&halte, line)
            .on(date)
            .in_entity(Some(selected.entity_number.clone()));
        let times = self.api.schedule_times(&query).await?;

        if times.is_empty() {
            return Err(TrackerError::NoTimes {
                halte,
                line: line.to_string(),
            });
        }

        self.selected_line = Some(selected);
        self.available_times = times;
        Ok(&self.available_times)
    }

    /// `(HH:MM_ritnummer, label)` pairs for the loaded departures.
    pub fn time_options(&self) -> Vec<(String, String)> {
        self.available_times
            .iter()
            .map(|t| (t.option_key(), t.option_label()))
            .collect()
    }

    /// Resolves a user-supplied departure to its option key: either the full
    /// `HH:MM_ritnummer` key, or a time of day (`08:15`, `8:15`) matching
    /// exactly one loaded departure.
    pub fn time_option_for(&self, time: &str) -> Result<String> {
        let unknown = || TrackerError::UnknownTime {
            option: time.to_string(),
        };

        if let Some(t) = self.available_times.iter().find(|t| t.option_key() == time) {
            return Ok(t.option_key());
        }

        let hhmm = target_time_of(time).map_err(|_| unknown())?;
        let mut matching = self.available_times.iter().filter(|t| t.time == hhmm);
        match (matching.next(), matching.next()) {
            (Some(t), None) => Ok(t.option_key()),
            (Some(_), Some(_)) => {
                warn!(time = %hhmm, "Several departures at this time, pass HH:MM_ritnummer");
                Err(unknown())
            }
            _ => Err(unknown()),
        }
    }

    /// Builds the device for the departure identified by `option_key`.
    pub fn select_time(&self, option_key: &str) -> Result<TrackedDevice> {
        let (Some(halte), Some(line)) = (&self.halte_number, &self.selected_line) else {
            return Err(TrackerError::FlowOrder {
                step: "select_time",
            });
        };

        let unknown = || TrackerError::UnknownTime {
            option: option_key.to_string(),
        };
        let (time, ritnummer) = option_key.split_once('_').ok_or_else(unknown)?;
        let selected = self
            .available_times
            .iter()
            .find(|t| t.time == time && t.ritnummer == ritnummer)
            .ok_or_else(unknown)?;

        let description = if line.description.is_empty() {
            format!("Line {}", line.lijnnummer)
        } else {
            line.description.clone()
        };

        Ok(TrackedDevice {
            halte_number: halte.clone(),
            line_number: line.lijnnummer.clone(),
            scheduled_time: selected.scheduled_at.to_rfc3339(),
            destination: selected.destination.clone(),
            public_line: Some(line.public_line.clone()),
            vehicle_type: "Bus".to_string(),
            line_description: Some(description),
            entity_number: Some(line.entity_number.clone()),
            halte_name: line.halte_name.clone(),
            ritnummer: Some(selected.ritnummer.clone()),
            unique_id: Some(format!("{}_{}_{}", halte, line.lijnnummer, selected.time)),
        })
    }

    /// Title for a freshly created configuration.
    pub fn entry_title(&self) -> Option<String> {
        self.selected_line
            .as_ref()
            .map(|l| format!("{} - Line {}", l.halte_name, l.public_line))
    }
}

/// Removal choices, led by the "keep everything" option.
pub fn removal_options(config: &TrackerConfig) -> Vec<(String, String)> {
    std::iter::once((
        KEEP_ALL_OPTION.to_string(),
        "Don't remove any device".to_string(),
    ))
    .chain(config.devices.iter().map(|d| (d.device_id(), d.option_label())))
    .collect()
}
